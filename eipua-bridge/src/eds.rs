//! Electronic Data Sheet (EDS) reading.
//!
//! EDS files are INI-like: `[Section]` headers followed by `Key = Value;`
//! entries. Values may be quoted, may span several lines and are
//! terminated by `;`. A `$` starts a comment outside of quotes. Entries
//! without a terminator end at the line break unless the line ends with
//! `,` or `=`, which continues the value on the next line.
//!
//! Only a handful of facts are needed by the bridge: the device identity
//! (for logging) and the byte size of the input assembly.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

/// Errors raised while reading an EDS file.
#[derive(Error, Debug)]
pub enum EdsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
}

type Section = BTreeMap<String, String>;

/// Parsed EDS contents: section name to key/value entries, case preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdsFile {
    sections: BTreeMap<String, Section>,
}

/// Identity facts from the `[Device]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor: String,
    pub product_name: String,
    pub revision: String,
}

const UNKNOWN: &str = "Unknown";

impl EdsFile {
    /// Read and parse an EDS file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EdsError> {
        let bytes = std::fs::read(path.as_ref())?;
        // EDS files in the wild are often Latin-1
        Self::parse(&String::from_utf8_lossy(&bytes))
    }

    /// Parse EDS text.
    pub fn parse(content: &str) -> Result<Self, EdsError> {
        Parser::default().run(content)
    }

    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(name)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Value of `key` in `section`, with surrounding quotes removed.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)?
            .get(key)
            .map(|v| unquote(v))
    }

    /// Device identity, `"Unknown"` for anything missing.
    pub fn device_info(&self) -> DeviceInfo {
        let first = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| self.get("Device", k))
                .unwrap_or(UNKNOWN)
                .to_string()
        };

        let revision = match (self.get("Device", "MajRev"), self.get("Device", "MinRev")) {
            (Some(major), Some(minor)) => format!("{}.{}", major, minor),
            (Some(major), None) => major.to_string(),
            _ => first(&["Revision"]),
        };

        DeviceInfo {
            vendor: first(&["VendName", "Vendor"]),
            product_name: first(&["ProdName", "Product Name"]),
            revision,
        }
    }

    /// All sections whose name starts with `Assembly`.
    pub fn assemblies(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, String>)> {
        self.sections
            .iter()
            .filter(|(name, _)| name.starts_with("Assembly"))
            .map(|(name, entries)| (name.as_str(), entries))
    }

    /// Byte size of assembly `instance`.
    ///
    /// Looks for `[Assembly <n>] Size` first, then the third field of
    /// `[Assembly] Assem<n>`. Unparseable sizes are logged and ignored.
    pub fn assembly_size(&self, instance: u16) -> Option<usize> {
        let section = format!("Assembly {}", instance);
        if let Some(raw) = self.get(&section, "Size") {
            return parse_size(&section, raw);
        }

        let key = format!("Assem{}", instance);
        let raw = self.sections.get("Assembly")?.get(&key)?;
        let size = fields(raw).into_iter().nth(2)?;
        if size.is_empty() {
            return None;
        }
        parse_size(&key, &size)
    }
}

fn parse_size(location: &str, raw: &str) -> Option<usize> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    };
    if parsed.is_none() {
        warn!(location, value = raw, "Ignoring malformed assembly size in EDS");
    }
    parsed
}

/// Split a value on commas outside quotes, unquoting each field.
pub fn fields(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in value.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ',' if !quoted => out.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    out.push(current);

    out.iter().map(|f| unquote(f.trim()).to_string()).collect()
}

fn unquote(value: &str) -> &str {
    let trimmed = value.trim();
    match trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(inner) if !inner.contains('"') => inner,
        _ => trimmed,
    }
}

#[derive(Default)]
struct Parser {
    sections: BTreeMap<String, Section>,
    current: Option<String>,
    statement: String,
    statement_line: usize,
    line: usize,
}

impl Parser {
    fn run(mut self, content: &str) -> Result<EdsFile, EdsError> {
        self.line = 1;
        let mut chars = content.chars().peekable();
        let mut quoted = false;

        while let Some(c) = chars.next() {
            match c {
                '"' => {
                    quoted = !quoted;
                    self.push(c);
                }
                '$' if !quoted => {
                    while chars.next_if(|&n| n != '\n').is_some() {}
                }
                '[' if !quoted && self.statement.trim().is_empty() => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some('\n') | None => {
                                return Err(self.error("unterminated section header"));
                            }
                            Some(c) => name.push(c),
                        }
                    }
                    self.statement.clear();
                    let name = name.trim().to_string();
                    self.sections.entry(name.clone()).or_default();
                    self.current = Some(name);
                }
                ';' if !quoted => self.finish()?,
                '\n' => {
                    if quoted || self.continues() {
                        self.push(' ');
                    } else {
                        self.finish()?;
                    }
                    self.line += 1;
                }
                '\r' => {}
                _ => self.push(c),
            }
        }

        if quoted {
            return Err(EdsError::Syntax {
                line: self.statement_line,
                message: "unterminated string".to_string(),
            });
        }
        self.finish()?;

        Ok(EdsFile {
            sections: self.sections,
        })
    }

    fn push(&mut self, c: char) {
        if self.statement.trim().is_empty() {
            self.statement_line = self.line;
        }
        self.statement.push(c);
    }

    fn continues(&self) -> bool {
        let trimmed = self.statement.trim_end();
        trimmed.ends_with(',') || trimmed.ends_with('=')
    }

    fn finish(&mut self) -> Result<(), EdsError> {
        let statement = std::mem::take(&mut self.statement);
        let statement = statement.trim();
        if statement.is_empty() {
            return Ok(());
        }

        let Some((key, value)) = statement.split_once('=') else {
            return Err(self.error(format!("expected 'Key = Value', found '{}'", statement)));
        };
        let Some(section) = &self.current else {
            return Err(self.error("entry outside of any section"));
        };

        self.sections
            .entry(section.clone())
            .or_default()
            .insert(key.trim().to_string(), value.trim().to_string());
        Ok(())
    }

    fn error(&self, message: impl Into<String>) -> EdsError {
        EdsError::Syntax {
            line: self.statement_line.max(1),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const M800: &str = r#"
$ Electronic Data Sheet for M800
[File]
        DescText = "M800 1-Channel EtherNet/IP";
        CreateDate = 01-07-2020;

[Device]
        VendCode = 2;
        VendName = "Mettler-Toledo";
        ProdName = "M800 Transmitter";   $ product
        MajRev = 1;
        MinRev = 2;

[Assembly]
        Assem100 =
                "Input Assembly",
                "20 04 24 64 30 03",
                128,
                0x0000,
                ,,;
        Assem150 = "Output", "20 04 24 96 30 03", 0x20, 0x0000,,,;
"#;

    #[test]
    fn test_parse_device_info() {
        let eds = EdsFile::parse(M800).unwrap();
        let info = eds.device_info();

        assert_eq!(info.vendor, "Mettler-Toledo");
        assert_eq!(info.product_name, "M800 Transmitter");
        assert_eq!(info.revision, "1.2");
        assert_eq!(eds.get("Device", "VendCode"), Some("2"));
    }

    #[test]
    fn test_device_info_fallbacks() {
        let eds = EdsFile::parse("[Device]\nVendor = ACME\nRevision = 3.1\n").unwrap();
        let info = eds.device_info();

        assert_eq!(info.vendor, "ACME");
        assert_eq!(info.product_name, "Unknown");
        assert_eq!(info.revision, "3.1");
    }

    #[test]
    fn test_assem_entry_sizes() {
        let eds = EdsFile::parse(M800).unwrap();

        assert_eq!(eds.assembly_size(100), Some(128));
        assert_eq!(eds.assembly_size(150), Some(32));
        assert_eq!(eds.assembly_size(101), None);
        assert_eq!(eds.assemblies().count(), 1);
    }

    #[test]
    fn test_assembly_section_size() {
        let eds = EdsFile::parse("[Assembly 100]\nSize = 64\nName = Input\n").unwrap();
        assert_eq!(eds.assembly_size(100), Some(64));
        assert_eq!(eds.get("Assembly 100", "Name"), Some("Input"));
    }

    #[test]
    fn test_malformed_size_ignored() {
        let eds = EdsFile::parse("[Assembly 100]\nSize = lots;\n").unwrap();
        assert_eq!(eds.assembly_size(100), None);
    }

    #[test]
    fn test_dollar_inside_quotes_is_kept() {
        let eds = EdsFile::parse("[File]\nDescText = \"costs $5\"; $ comment\n").unwrap();
        assert_eq!(eds.get("File", "DescText"), Some("costs $5"));
    }

    #[test]
    fn test_fields() {
        assert_eq!(
            fields(r#""a, b", 2 ,,0x10"#),
            vec!["a, b".to_string(), "2".into(), "".into(), "0x10".into()]
        );
    }

    #[test]
    fn test_syntax_errors() {
        let err = EdsFile::parse("Key = 1;\n").unwrap_err();
        assert!(err.to_string().contains("outside"));

        let err = EdsFile::parse("[Device]\n\nnot an entry;\n").unwrap_err();
        match err {
            EdsError::Syntax { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }

        assert!(EdsFile::parse("[Device\n").is_err());
        assert!(EdsFile::parse("[Device]\nName = \"open\n").is_err());
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(M800.as_bytes()).unwrap();

        let eds = EdsFile::load(file.path()).unwrap();
        assert_eq!(eds.assembly_size(100), Some(128));

        let missing = EdsFile::load(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(EdsError::Io(_))));
    }
}
