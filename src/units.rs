//! 单位与数量表达式
//!
//! 内部统一使用基本单位：字节、字节/秒、秒。配置文件中的数值写成
//! `10 * gbps`、`16 * GB`、`1 * MilliSec` 这样的表达式，这里按整数分子/分母
//! 精确换算（亚秒单位用除法而不是乘以近似小数）。

use std::fmt;

/// 命名单位：`value_in_base = value * num / den`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unit {
    pub name: &'static str,
    pub num: u64,
    pub den: u64,
}

impl Unit {
    const fn new(name: &'static str, num: u64, den: u64) -> Self {
        Self { name, num, den }
    }

    /// 把以本单位表示的数值换算为基本单位
    pub fn to_base(self, value: f64) -> f64 {
        value * self.num as f64 / self.den as f64
    }

    /// 把基本单位数值换算为以本单位表示
    pub fn from_base(self, value: f64) -> f64 {
        value * self.den as f64 / self.num as f64
    }

    /// 以 `<value> * <name>` 形式输出
    pub fn format(self, base_value: f64) -> String {
        format!("{} * {}", self.from_base(base_value), self.name)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub const BYTE: Unit = Unit::new("Byte", 1, 1);
pub const KB: Unit = Unit::new("KB", 1 << 10, 1);
pub const MB: Unit = Unit::new("MB", 1 << 20, 1);
pub const GB: Unit = Unit::new("GB", 1 << 30, 1);
// 网络速率以 bit 计，内部为字节/秒
pub const KBPS: Unit = Unit::new("kbps", 125, 1);
pub const MBPS: Unit = Unit::new("mbps", 125_000, 1);
pub const GBPS: Unit = Unit::new("gbps", 125_000_000, 1);
pub const SEC: Unit = Unit::new("Sec", 1, 1);
pub const MILLI_SEC: Unit = Unit::new("MilliSec", 1, 1_000);

const ALL_UNITS: [Unit; 9] = [BYTE, KB, MB, GB, KBPS, MBPS, GBPS, SEC, MILLI_SEC];

pub fn lookup(name: &str) -> Option<Unit> {
    ALL_UNITS.iter().copied().find(|u| u.name == name)
}

/// 求值 `a * b / c ...` 形式的数量表达式，因子可以是数字或命名单位。
pub fn eval_quantity(raw: &str) -> Result<f64, String> {
    let expr = raw.trim();
    if expr.is_empty() {
        return Err("empty quantity".to_string());
    }

    let mut value = 1.0;
    let mut op = '*';
    let mut token = String::new();
    for ch in expr.chars().chain(std::iter::once('*')) {
        if ch != '*' && ch != '/' {
            token.push(ch);
            continue;
        }
        value = apply_factor(expr, value, op, token.trim())?;
        token.clear();
        op = ch;
    }
    Ok(value)
}

fn apply_factor(expr: &str, cur: f64, op: char, token: &str) -> Result<f64, String> {
    if token.is_empty() {
        return Err(format!("dangling operator in {expr:?}"));
    }
    if let Some(unit) = lookup(token) {
        return Ok(match op {
            '*' => unit.to_base(cur),
            _ => unit.from_base(cur),
        });
    }
    let n: f64 = token
        .parse()
        .map_err(|_| format!("unknown factor {token:?} in {expr:?}"))?;
    match op {
        '*' => Ok(cur * n),
        _ if n == 0.0 => Err(format!("division by zero in {expr:?}")),
        _ => Ok(cur / n),
    }
}
