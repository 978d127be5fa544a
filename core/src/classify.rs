use std::collections::HashMap;

/// The kind of a SQL statement, derived from a short uppercase prefix of the
/// statement text. Routing decisions (reader vs. writer, transaction
/// bookkeeping, cacheability) all key off this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlKind {
    Abort,
    Attach,
    Begin,
    Commit,
    Ddl,
    Other,
    Pragma,
    Select,
    Unprepared,
    Update,
}

impl SqlKind {
    /// Anything that is not a plain read is routed to the writer.
    pub fn is_predicted_write(self) -> bool {
        !matches!(self, SqlKind::Select | SqlKind::Pragma)
    }

    pub fn begins(self) -> bool {
        matches!(self, SqlKind::Begin)
    }

    pub fn commits(self) -> bool {
        matches!(self, SqlKind::Commit)
    }

    pub fn aborts(self) -> bool {
        matches!(self, SqlKind::Abort)
    }

    pub fn is_transactional(self) -> bool {
        self.begins() || self.commits() || self.aborts()
    }

    /// Statements that must not go through the prepared-statement cache.
    pub fn is_cacheable(self) -> bool {
        !matches!(self, SqlKind::Attach | SqlKind::Unprepared)
    }
}

/// Tags a statement by inspecting the first three characters after leading
/// non-letter characters, the way the original Android classifier does, with
/// longer look-ahead only to split ROLLBACK from ROLLBACK TO and RELEASE.
pub fn classify(sql: &str) -> SqlKind {
    let trimmed = sql.trim_start_matches(|c: char| !c.is_ascii_alphabetic());
    let mut prefix = trimmed.chars().take(3).map(|c| c.to_ascii_uppercase());
    let (Some(first), Some(second), Some(third)) = (prefix.next(), prefix.next(), prefix.next())
    else {
        return SqlKind::Other;
    };
    match first {
        'S' => match second {
            'E' => SqlKind::Select,
            // SAVEPOINT and the like.
            _ => SqlKind::Other,
        },
        'I' | 'U' => SqlKind::Update,
        'D' => match third {
            'L' => SqlKind::Update,     // DELETE
            'O' => SqlKind::Ddl,        // DROP
            'T' => SqlKind::Unprepared, // DETACH
            _ => SqlKind::Other,
        },
        'R' => match third {
            'L' => {
                // ROLLBACK TO <savepoint> and RELEASE unwind savepoints, not
                // the transaction itself.
                let rollback_to = trimmed
                    .chars()
                    .nth(9)
                    .map(|c| c.to_ascii_uppercase() == 'T')
                    .unwrap_or(false);
                let release = trimmed.len() >= 7 && second == 'E';
                if rollback_to || release {
                    SqlKind::Other
                } else {
                    SqlKind::Abort
                }
            }
            'P' => SqlKind::Update, // REPLACE
            _ => SqlKind::Other,
        },
        'B' => SqlKind::Begin,
        'C' => match second {
            'O' => SqlKind::Commit,
            'R' => SqlKind::Ddl, // CREATE
            _ => SqlKind::Other,
        },
        'E' => match second {
            'N' => SqlKind::Commit, // END
            _ => SqlKind::Other,
        },
        'P' => SqlKind::Pragma,
        'A' => match second {
            'L' => SqlKind::Ddl,        // ALTER
            'T' => SqlKind::Attach,     // ATTACH
            'N' => SqlKind::Unprepared, // ANALYZE
            _ => SqlKind::Other,
        },
        _ => SqlKind::Other,
    }
}

/// Maps each named parameter (sigil included) to its 1-based position.
///
/// The scan walks the statement once, skipping string literals, quoted and
/// bracketed identifiers and both comment forms, and counts `?` and `?NNN`
/// placeholders so named positions line up with what the engine will assign at
/// prepare time. Malformed SQL never fails here; preparation reports the
/// precise syntax error instead.
pub fn parse_named_parameters(sql: &str) -> HashMap<String, usize> {
    let bytes = sql.as_bytes();
    let mut parameters = HashMap::new();
    let mut highest = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => i = skip_quoted(bytes, i, quote),
            b'[' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b']' {
                    i += 1;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i += 2;
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
            }
            b'?' => {
                i += 1;
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if i > start {
                    // ?NNN consumes exactly position NNN.
                    if let Ok(position) = sql[start..i].parse::<usize>() {
                        highest = highest.max(position);
                    }
                } else {
                    highest += 1;
                }
            }
            b':' | b'@' | b'$' => {
                let start = i;
                i += 1;
                if i < bytes.len() && (bytes[i].is_ascii_alphabetic() || bytes[i] == b'_') {
                    i += 1;
                    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                    {
                        i += 1;
                    }
                    let name = &sql[start..i];
                    if !parameters.contains_key(name) {
                        highest += 1;
                        parameters.insert(name.to_owned(), highest);
                    }
                }
            }
            _ => i += 1,
        }
    }
    parameters
}

fn skip_quoted(bytes: &[u8], mut i: usize, quote: u8) -> usize {
    i += 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            // A doubled quote is an escape, not a terminator.
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}
