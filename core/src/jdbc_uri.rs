use crate::conn::JournalMode;
use crate::error::{Error, Result};
use crate::pool::PoolConfiguration;
use lazy_static::lazy_static;
use percent_encoding::percent_decode_str;
use regex::{Regex, RegexSet, RegexSetBuilder};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

pub const KEY: &str = "key";
pub const POOL_SIZE: &str = "poolSize";
pub const BUSY_TIMEOUT: &str = "busyTimeout";
pub const JOURNAL_MODE: &str = "journalMode";
pub const FOREIGN_KEYS: &str = "foreignKeys";

const JDBC_PREFIX: &str = "jdbc:";
const SUBPROTOCOLS: &[&str] = &["selekt", "sqlite"];

// Indices into KEYWORDS; keep both lists in the same order.
const RECOGNIZED: [&str; 5] = [KEY, POOL_SIZE, BUSY_TIMEOUT, JOURNAL_MODE, FOREIGN_KEYS];

lazy_static! {
    static ref KEYWORDS: RegexSet = RegexSetBuilder::new(
        RECOGNIZED
            .into_iter()
            .map(|x| "^".to_string() + x + "$")
            .collect::<Vec<_>>()
    )
    .case_insensitive(true)
    .build()
    .unwrap();
    static ref HEX_KEY: Regex = Regex::new("^0[xX][0-9A-Fa-f]*$").unwrap();
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidUriFormat(message.into())
}

/// A parsed `jdbc:{selekt|sqlite}:<path>[?prop=value(&prop=value)*]` URL.
///
/// Recognized properties configure the pool; unknown properties are retained
/// but otherwise ignored. If a property repeats, the first occurrence wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JdbcUri {
    pub path: String,
    pub key: Option<Vec<u8>>,
    pub pool_size: usize,
    pub busy_timeout: Duration,
    pub journal_mode: JournalMode,
    pub foreign_keys: bool,
    pub retained: HashMap<String, String>,
}

impl JdbcUri {
    pub fn parse(url: &str) -> Result<JdbcUri> {
        let rest = url
            .strip_prefix(JDBC_PREFIX)
            .ok_or_else(|| invalid(format!("'{url}' does not begin with '{JDBC_PREFIX}'")))?;
        let (subprotocol, rest) = rest
            .split_once(':')
            .ok_or_else(|| invalid("missing subprotocol separator"))?;
        if !SUBPROTOCOLS.contains(&subprotocol) {
            return Err(invalid(format!(
                "unsupported subprotocol '{subprotocol}'; expected one of {SUBPROTOCOLS:?}"
            )));
        }
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };
        if path.is_empty() {
            return Err(invalid("database path must not be empty"));
        }
        let mut uri = JdbcUri {
            path: path.to_owned(),
            key: None,
            pool_size: constants::DEFAULT_POOL_SIZE,
            busy_timeout: Duration::from_millis(constants::DEFAULT_BUSY_TIMEOUT_MILLIS),
            journal_mode: JournalMode::Wal,
            foreign_keys: true,
            retained: HashMap::new(),
        };
        let mut seen = HashSet::new();
        if let Some(query) = query {
            for token in query.split('&') {
                if token.is_empty() {
                    continue;
                }
                let (name, value) = token.split_once('=').unwrap_or((token, ""));
                let value = percent_decode_str(value)
                    .decode_utf8()
                    .map_err(|_| invalid(format!("value of '{name}' is not valid UTF-8")))?
                    .into_owned();
                // If properties repeat, the first is the one that is kept.
                if !seen.insert(name.to_ascii_lowercase()) {
                    continue;
                }
                uri.apply(name, value)?;
            }
        }
        Ok(uri)
    }

    fn apply(&mut self, name: &str, value: String) -> Result<()> {
        match KEYWORDS.matches(name).iter().next().map(|i| RECOGNIZED[i]) {
            Some(KEY) => self.key = Some(parse_key(&value)?),
            Some(POOL_SIZE) => {
                self.pool_size = value
                    .parse()
                    .ok()
                    .filter(|size| *size > 0)
                    .ok_or_else(|| {
                        invalid(format!("'{value}' is not a positive pool size"))
                    })?;
            }
            Some(BUSY_TIMEOUT) => {
                let millis: u64 = value.parse().map_err(|_| {
                    invalid(format!("'{value}' is not a non-negative millisecond count"))
                })?;
                self.busy_timeout = Duration::from_millis(millis);
            }
            Some(JOURNAL_MODE) => {
                self.journal_mode = JournalMode::parse(&value)
                    .ok_or_else(|| invalid(format!("'{value}' is not a journal mode")))?;
            }
            Some(FOREIGN_KEYS) => {
                self.foreign_keys = match value.to_ascii_lowercase().as_str() {
                    "true" | "1" => true,
                    "false" | "0" => false,
                    _ => return Err(invalid(format!("'{value}' is not a boolean"))),
                };
            }
            _ => {
                self.retained.insert(name.to_owned(), value);
            }
        }
        Ok(())
    }

    pub fn to_pool_configuration(&self) -> PoolConfiguration {
        PoolConfiguration {
            path: self.path.clone(),
            max_connections: self.pool_size,
            idle_timeout: Duration::from_millis(constants::DEFAULT_IDLE_TIMEOUT_MILLIS),
            busy_timeout: self.busy_timeout,
            journal_mode: self.journal_mode,
            foreign_keys: self.foreign_keys,
            key: self.key.clone(),
            statement_cache_capacity: constants::DEFAULT_STATEMENT_CACHE_CAPACITY,
        }
    }
}

/// Accepted key forms: `0x…` hex (two digits per byte), a path to a file of
/// raw key bytes, or a plain passphrase taken as UTF-8.
fn parse_key(value: &str) -> Result<Vec<u8>> {
    if HEX_KEY.is_match(value) {
        let digits = &value[2..];
        if digits.is_empty() || digits.len() % 2 != 0 {
            return Err(invalid("hex key must have an even number of digits"));
        }
        return digits
            .as_bytes()
            .chunks(2)
            .map(|pair| {
                u8::from_str_radix(std::str::from_utf8(pair).expect("hex digits"), 16)
                    .map_err(|_| invalid("hex key must contain only hex digits"))
            })
            .collect();
    }
    if Path::new(value).is_file() {
        return std::fs::read(value)
            .map_err(|error| invalid(format!("unable to read key file '{value}': {error}")));
    }
    Ok(value.as_bytes().to_vec())
}

#[cfg(test)]
mod unit {
    mod parse {
        use crate::conn::JournalMode;
        use crate::jdbc_uri::JdbcUri;
        use std::time::Duration;

        #[test]
        fn path_and_properties() {
            let uri = JdbcUri::parse("jdbc:selekt:/tmp/db?poolSize=5&key=hello%20world").unwrap();
            assert_eq!("/tmp/db", uri.path);
            assert_eq!(5, uri.pool_size);
            assert_eq!(Some(b"hello world".to_vec()), uri.key);
        }

        #[test]
        fn legacy_subprotocol_is_accepted() {
            let uri = JdbcUri::parse("jdbc:sqlite:/tmp/db").unwrap();
            assert_eq!("/tmp/db", uri.path);
        }

        #[test]
        fn unknown_subprotocol_is_rejected() {
            assert!(JdbcUri::parse("jdbc:other:/tmp/db").is_err());
        }

        #[test]
        fn missing_path_is_rejected() {
            assert!(JdbcUri::parse("jdbc:selekt:").is_err());
            assert!(JdbcUri::parse("jdbc:selekt:?poolSize=1").is_err());
        }

        #[test]
        fn missing_prefix_is_rejected() {
            assert!(JdbcUri::parse("odbc:selekt:/tmp/db").is_err());
            assert!(JdbcUri::parse("jdbc-selekt-/tmp/db").is_err());
        }

        #[test]
        fn defaults() {
            let uri = JdbcUri::parse("jdbc:selekt:/tmp/db").unwrap();
            assert_eq!(constants::DEFAULT_POOL_SIZE, uri.pool_size);
            assert_eq!(
                Duration::from_millis(constants::DEFAULT_BUSY_TIMEOUT_MILLIS),
                uri.busy_timeout
            );
            assert_eq!(JournalMode::Wal, uri.journal_mode);
            assert!(uri.foreign_keys);
            assert_eq!(None, uri.key);
            assert!(uri.retained.is_empty());
        }

        #[test]
        fn journal_modes_are_case_insensitive() {
            for (text, mode) in [
                ("delete", JournalMode::Delete),
                ("TRUNCATE", JournalMode::Truncate),
                ("Persist", JournalMode::Persist),
                ("memory", JournalMode::Memory),
                ("wal", JournalMode::Wal),
                ("off", JournalMode::Off),
            ] {
                let uri =
                    JdbcUri::parse(&format!("jdbc:selekt:/tmp/db?journalMode={text}")).unwrap();
                assert_eq!(mode, uri.journal_mode);
            }
            assert!(JdbcUri::parse("jdbc:selekt:/tmp/db?journalMode=rollback").is_err());
        }

        #[test]
        fn foreign_keys_booleans() {
            for (text, expected) in [("true", true), ("1", true), ("false", false), ("0", false)] {
                let uri =
                    JdbcUri::parse(&format!("jdbc:selekt:/tmp/db?foreignKeys={text}")).unwrap();
                assert_eq!(expected, uri.foreign_keys);
            }
            assert!(JdbcUri::parse("jdbc:selekt:/tmp/db?foreignKeys=yes").is_err());
        }

        #[test]
        fn busy_timeout_millis() {
            let uri = JdbcUri::parse("jdbc:selekt:/tmp/db?busyTimeout=0").unwrap();
            assert_eq!(Duration::ZERO, uri.busy_timeout);
            assert!(JdbcUri::parse("jdbc:selekt:/tmp/db?busyTimeout=-1").is_err());
            assert!(JdbcUri::parse("jdbc:selekt:/tmp/db?poolSize=0").is_err());
        }

        #[test]
        fn unknown_properties_are_retained() {
            let uri = JdbcUri::parse("jdbc:selekt:/tmp/db?cacheSize=100&poolSize=2").unwrap();
            assert_eq!(2, uri.pool_size);
            assert_eq!(Some(&"100".to_owned()), uri.retained.get("cacheSize"));
        }

        #[test]
        fn first_occurrence_wins() {
            let uri = JdbcUri::parse("jdbc:selekt:/tmp/db?poolSize=2&poolSize=9").unwrap();
            assert_eq!(2, uri.pool_size);
        }

        #[test]
        fn property_names_match_case_insensitively() {
            let uri = JdbcUri::parse("jdbc:selekt:/tmp/db?POOLSIZE=3").unwrap();
            assert_eq!(3, uri.pool_size);
        }

        #[test]
        fn value_may_contain_equals() {
            let uri = JdbcUri::parse("jdbc:selekt:/tmp/db?note=a=b").unwrap();
            assert_eq!(Some(&"a=b".to_owned()), uri.retained.get("note"));
        }

        #[test]
        fn windows_style_path_with_query() {
            let uri = JdbcUri::parse("jdbc:selekt:C:/data/app.db?poolSize=4").unwrap();
            assert_eq!("C:/data/app.db", uri.path);
            assert_eq!(4, uri.pool_size);
        }
    }

    mod parse_key {
        use crate::jdbc_uri::parse_key;

        #[test]
        fn hex_form() {
            assert_eq!(vec![0xde, 0xad, 0xbe, 0xef], parse_key("0xDEADbeef").unwrap());
            assert_eq!(vec![0x00, 0x01], parse_key("0x0001").unwrap());
        }

        #[test]
        fn odd_hex_is_rejected() {
            assert!(parse_key("0xabc").is_err());
            assert!(parse_key("0x").is_err());
        }

        #[test]
        fn plain_string_form() {
            assert_eq!(b"passphrase".to_vec(), parse_key("passphrase").unwrap());
            // Not valid hex, so the 0x prefix alone does not trigger hex
            // parsing.
            assert_eq!(b"0xzz".to_vec(), parse_key("0xzz").unwrap());
        }

        #[test]
        fn key_file_form() {
            let path = std::env::temp_dir().join(format!("selekt_key_{}", std::process::id()));
            std::fs::write(&path, [1u8, 2, 3]).unwrap();
            let key = parse_key(path.to_str().unwrap()).unwrap();
            assert_eq!(vec![1, 2, 3], key);
            std::fs::remove_file(path).unwrap();
        }
    }
}
