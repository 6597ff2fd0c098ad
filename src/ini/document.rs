//! INI 文档：有序的节与键值对

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::value::{IniValue, parse_value};
use crate::units;

#[derive(Debug, Error)]
pub enum IniError {
    #[error("line {line}: {msg}")]
    Syntax { line: usize, msg: String },
    #[error("duplicate section [{0}]")]
    DuplicateSection(String),
    #[error("duplicate key {key:?} in [{section}]")]
    DuplicateKey { section: String, key: String },
    #[error("missing section [{0}]")]
    MissingSection(String),
    #[error("missing key {key:?} in [{section}]")]
    MissingKey { section: String, key: String },
    #[error("bad value for {key:?} in [{section}]: {msg}")]
    BadValue {
        section: String,
        key: String,
        msg: String,
    },
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 一个节，键按出现顺序保存。键统一转为小写。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, key: &str) -> Result<&str, IniError> {
        self.get(key).ok_or_else(|| IniError::MissingKey {
            section: self.name.clone(),
            key: key.to_string(),
        })
    }

    fn bad_value(&self, key: &str, msg: impl Into<String>) -> IniError {
        IniError::BadValue {
            section: self.name.clone(),
            key: key.to_string(),
            msg: msg.into(),
        }
    }

    /// 字符串值；若带引号则去掉引号
    pub fn get_str(&self, key: &str) -> Result<String, IniError> {
        let raw = self.require(key)?;
        match parse_value(raw) {
            Ok(IniValue::Str(s)) => Ok(s),
            _ => Ok(raw.trim().to_string()),
        }
    }

    /// 带单位的数量，换算为基本单位
    pub fn get_quantity(&self, key: &str) -> Result<f64, IniError> {
        let raw = self.require(key)?;
        units::eval_quantity(raw).map_err(|msg| self.bad_value(key, msg))
    }

    pub fn get_usize(&self, key: &str) -> Result<usize, IniError> {
        let raw = self.require(key)?;
        match parse_value(raw) {
            Ok(IniValue::Int(n)) if n >= 0 => Ok(n as usize),
            _ => Err(self.bad_value(key, format!("expected a non-negative integer, got {raw:?}"))),
        }
    }

    pub fn get_list(&self, key: &str) -> Result<Vec<IniValue>, IniError> {
        let raw = self.require(key)?;
        match parse_value(raw) {
            Ok(IniValue::List(items)) => Ok(items),
            Ok(other) => Err(self.bad_value(key, format!("expected a list, got {other:?}"))),
            Err(msg) => Err(self.bad_value(key, msg)),
        }
    }
}

/// 解析后的 INI 文档，节按出现顺序保存
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IniDocument {
    sections: Vec<Section>,
}

impl IniDocument {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, IniError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| IniError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, IniError> {
        let mut doc = IniDocument::default();
        for (idx, line) in raw.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .ok_or_else(|| IniError::Syntax {
                        line: line_no,
                        msg: format!("unterminated section header {line:?}"),
                    })?
                    .trim();
                if doc.section(name).is_some() {
                    return Err(IniError::DuplicateSection(name.to_string()));
                }
                doc.sections.push(Section {
                    name: name.to_string(),
                    entries: Vec::new(),
                });
                continue;
            }

            let split_at = line.find(['=', ':']).ok_or_else(|| IniError::Syntax {
                line: line_no,
                msg: format!("expected `key = value`, got {line:?}"),
            })?;
            let key = line[..split_at].trim().to_lowercase();
            let value = line[split_at + 1..].trim().to_string();
            if key.is_empty() {
                return Err(IniError::Syntax {
                    line: line_no,
                    msg: "empty key".to_string(),
                });
            }

            let section = doc.sections.last_mut().ok_or_else(|| IniError::Syntax {
                line: line_no,
                msg: "key outside of any section".to_string(),
            })?;
            if section.entries.iter().any(|(k, _)| *k == key) {
                return Err(IniError::DuplicateKey {
                    section: section.name.clone(),
                    key,
                });
            }
            section.entries.push((key, value));
        }
        Ok(doc)
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn require(&self, name: &str) -> Result<&Section, IniError> {
        self.section(name)
            .ok_or_else(|| IniError::MissingSection(name.to_string()))
    }
}
