//! 值字面量：字符串、整数、数字、列表

use std::fmt;

use crate::units;

#[derive(Debug, Clone, PartialEq)]
pub enum IniValue {
    Str(String),
    Int(i64),
    Num(f64),
    List(Vec<IniValue>),
}

impl IniValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            IniValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            IniValue::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for IniValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IniValue::Str(s) => write!(f, "'{s}'"),
            IniValue::Int(n) => write!(f, "{n}"),
            IniValue::Num(x) => write!(f, "{x}"),
            IniValue::List(items) => f.write_str(&format_list(items)),
        }
    }
}

/// 以 `[a, b, c]` 形式输出列表
pub fn format_list<T: fmt::Display>(items: &[T]) -> String {
    let inner: Vec<String> = items.iter().map(|it| it.to_string()).collect();
    format!("[{}]", inner.join(", "))
}

/// 解析单个值
pub fn parse_value(raw: &str) -> Result<IniValue, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty value".to_string());
    }

    if let Some(inner) = raw.strip_prefix('[') {
        let inner = inner
            .strip_suffix(']')
            .ok_or_else(|| format!("unterminated list {raw:?}"))?;
        return split_items(inner)?
            .into_iter()
            .map(parse_value)
            .collect::<Result<Vec<_>, _>>()
            .map(IniValue::List);
    }

    if let Some(s) = unquote(raw)? {
        return Ok(IniValue::Str(s));
    }

    if let Ok(n) = raw.parse::<i64>() {
        return Ok(IniValue::Int(n));
    }

    units::eval_quantity(raw).map(IniValue::Num)
}

fn unquote(raw: &str) -> Result<Option<String>, String> {
    let Some(quote) = raw.chars().next().filter(|c| *c == '\'' || *c == '"') else {
        return Ok(None);
    };
    if raw.len() < 2 || !raw.ends_with(quote) {
        return Err(format!("unterminated string {raw:?}"));
    }
    Ok(Some(raw[1..raw.len() - 1].to_string()))
}

/// 按顶层逗号切分列表元素（引号和嵌套括号内的逗号不切）
fn split_items(inner: &str) -> Result<Vec<&str>, String> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, ch) in inner.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| format!("unbalanced brackets in {inner:?}"))?;
            }
            (None, ',') if depth == 0 => {
                items.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() || depth != 0 {
        return Err(format!("unbalanced list {inner:?}"));
    }

    // 允许 Python 风格的结尾逗号
    let last = inner[start..].trim();
    if !last.is_empty() {
        items.push(last);
    }
    if items.iter().any(|it| it.is_empty()) {
        return Err(format!("empty list item in {inner:?}"));
    }
    Ok(items)
}
