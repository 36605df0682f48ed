//! Battle script parsing
//!
//! One instruction per line: `OPCODE,val1,val2,...`. Lines starting with `#`
//! and blank lines are skipped. Positional values are named through a
//! per-opcode table and each value is coerced to an integer, else a float,
//! else left as a string.
//!
//! Parsing never fails on an unknown opcode; it becomes
//! [`Command::Unknown`] and is skipped when the script runs. Lines whose
//! values do not fit their opcode are dropped with a warning.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::game::Formation;

/// A coerced parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    /// Integer if it parses as one, else float, else the trimmed string.
    ///
    /// `"1"` is `Int(1)` and `"1.5"` is `Float(1.5)`. Float parsing follows
    /// Rust's grammar, so `"1e2"`, `"inf"` and `"nan"` are floats too.
    /// Single underscores between digits group them: `"1_000"` is `Int(1000)`.
    pub fn coerce(raw: &str) -> Self {
        let raw = raw.trim();
        let digits = ungroup_digits(raw);
        let number = digits.as_deref().unwrap_or(raw);
        if let Ok(n) = number.parse::<i64>() {
            Value::Int(n)
        } else if let Ok(f) = number.parse::<f64>() {
            Value::Float(f)
        } else {
            Value::Str(raw.to_string())
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric value of either an integer or a float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            Value::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// `raw` without its digit-group underscores, when every underscore sits
/// between two ASCII digits. `None` if there is nothing to strip or the
/// grouping is invalid.
fn ungroup_digits(raw: &str) -> Option<String> {
    if !raw.contains('_') {
        return None;
    }
    let bytes = raw.as_bytes();
    let grouped = bytes.iter().enumerate().all(|(i, &b)| {
        b != b'_'
            || (i > 0
                && bytes[i - 1].is_ascii_digit()
                && bytes.get(i + 1).is_some_and(u8::is_ascii_digit))
    });
    grouped.then(|| raw.replace('_', ""))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// Positional parameter names of a known opcode
pub fn parameter_names(opcode: &str) -> Option<&'static [&'static str]> {
    let names: &'static [&'static str] = match opcode {
        "BattleStart" | "BattleEnd" | "Skip" | "Auto" | "Exit" => &["timeout"],
        "Attack" | "Boost" => &[],
        "Role" | "XRole" => &["role", "skill", "boost", "x", "y"],
        "SP" | "XSP" => &["role", "boost", "x", "y"],
        "Wait" => &["seconds"],
        "Click" => &["x", "y"],
        "Switch" => &["target"],
        "CheckDead" => &["role", "timeout"],
        "Dialog" => &["count"],
        _ => return None,
    };
    Some(names)
}

/// One script line split into an opcode and named values
#[derive(Debug, Clone, PartialEq)]
pub struct RawInstruction {
    pub opcode: String,
    /// Named values in positional order; empty fields are left out
    pub params: Vec<(String, Value)>,
    /// Positional fields beyond the opcode's table
    pub extra: usize,
    /// 1-based line number
    pub line: usize,
}

impl RawInstruction {
    /// Split one line; `None` for blank and comment lines
    pub fn parse_line(text: &str, line: usize) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() || text.starts_with('#') {
            return None;
        }

        let mut fields = text.split(',').map(str::trim);
        let opcode = fields.next().unwrap_or_default().to_string();
        let args: Vec<&str> = fields.collect();

        let (params, extra) = match parameter_names(&opcode) {
            Some(names) => {
                let params = names
                    .iter()
                    .zip(&args)
                    .filter(|(_, raw)| !raw.is_empty())
                    .map(|(name, raw)| (name.to_string(), Value::coerce(raw)))
                    .collect();
                (params, args.len().saturating_sub(names.len()))
            }
            None => {
                let params = args
                    .iter()
                    .enumerate()
                    .filter(|(_, raw)| !raw.is_empty())
                    .map(|(i, raw)| (format!("arg{}", i), Value::coerce(raw)))
                    .collect();
                (params, 0)
            }
        };

        Some(Self {
            opcode,
            params,
            extra,
            line,
        })
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params
            .iter()
            .find(|(param, _)| param == name)
            .map(|(_, value)| value)
    }
}

/// A typed instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BattleStart {
        timeout: Option<Duration>,
    },
    BattleEnd {
        timeout: Option<Duration>,
    },
    Attack,
    /// Character skill; `back_row` moves the character to the back row first
    Role {
        role: usize,
        skill: usize,
        boost: usize,
        target: Option<(i32, i32)>,
        back_row: bool,
    },
    /// Character special
    Special {
        role: usize,
        boost: usize,
        target: Option<(i32, i32)>,
        back_row: bool,
    },
    Wait {
        duration: Duration,
    },
    Skip {
        timeout: Option<Duration>,
    },
    Click {
        x: i32,
        y: i32,
    },
    /// `None` flips the current formation
    Switch {
        target: Option<Formation>,
    },
    Boost,
    Auto {
        timeout: Option<Duration>,
    },
    /// `role` 0 means any party member
    CheckDead {
        role: usize,
        timeout: Option<Duration>,
    },
    Exit {
        timeout: Option<Duration>,
    },
    Dialog {
        count: u32,
    },
    Unknown {
        opcode: String,
    },
}

/// Highest boost level a cast accepts
pub const MAX_BOOST: usize = 3;

impl Command {
    /// Type-check a raw instruction; `Err` carries why the line is unusable
    pub fn from_raw(raw: &RawInstruction) -> Result<Self, String> {
        let command = match raw.opcode.as_str() {
            "BattleStart" => Command::BattleStart {
                timeout: timeout(raw, "timeout")?,
            },
            "BattleEnd" => Command::BattleEnd {
                timeout: timeout(raw, "timeout")?,
            },
            "Attack" => Command::Attack,
            "Role" | "XRole" => Command::Role {
                role: int_in(raw, "role", 1, 4)?.ok_or("missing role")?,
                skill: int_in(raw, "skill", 1, 4)?.ok_or("missing skill")?,
                boost: int_in(raw, "boost", 0, MAX_BOOST)?.unwrap_or(0),
                target: target(raw)?,
                back_row: raw.opcode == "XRole",
            },
            "SP" | "XSP" => Command::Special {
                role: int_in(raw, "role", 1, 4)?.ok_or("missing role")?,
                boost: int_in(raw, "boost", 0, MAX_BOOST)?.unwrap_or(0),
                target: target(raw)?,
                back_row: raw.opcode == "XSP",
            },
            "Wait" => Command::Wait {
                duration: timeout(raw, "seconds")?.ok_or("missing seconds")?,
            },
            "Skip" => Command::Skip {
                timeout: timeout(raw, "timeout")?,
            },
            "Click" => Command::Click {
                x: coordinate(raw, "x")?.ok_or("missing x")?,
                y: coordinate(raw, "y")?.ok_or("missing y")?,
            },
            "Switch" => Command::Switch {
                target: match raw.param("target") {
                    None => None,
                    Some(Value::Str(s)) => Some(s.parse::<Formation>()?),
                    Some(other) => {
                        return Err(format!("target must be front or back, got {}", other))
                    }
                },
            },
            "Boost" => Command::Boost,
            "Auto" => Command::Auto {
                timeout: timeout(raw, "timeout")?,
            },
            "CheckDead" => Command::CheckDead {
                role: int_in(raw, "role", 0, 8)?.unwrap_or(0),
                timeout: timeout(raw, "timeout")?,
            },
            "Exit" => Command::Exit {
                timeout: timeout(raw, "timeout")?,
            },
            "Dialog" => Command::Dialog {
                count: int_in(raw, "count", 1, 99)?.unwrap_or(1) as u32,
            },
            other => Command::Unknown {
                opcode: other.to_string(),
            },
        };
        Ok(command)
    }

    /// Opcode as written in scripts
    pub fn opcode(&self) -> &str {
        match self {
            Command::BattleStart { .. } => "BattleStart",
            Command::BattleEnd { .. } => "BattleEnd",
            Command::Attack => "Attack",
            Command::Role { back_row: false, .. } => "Role",
            Command::Role { back_row: true, .. } => "XRole",
            Command::Special { back_row: false, .. } => "SP",
            Command::Special { back_row: true, .. } => "XSP",
            Command::Wait { .. } => "Wait",
            Command::Skip { .. } => "Skip",
            Command::Click { .. } => "Click",
            Command::Switch { .. } => "Switch",
            Command::Boost => "Boost",
            Command::Auto { .. } => "Auto",
            Command::CheckDead { .. } => "CheckDead",
            Command::Exit { .. } => "Exit",
            Command::Dialog { .. } => "Dialog",
            Command::Unknown { opcode } => opcode,
        }
    }
}

fn int_in(
    raw: &RawInstruction,
    name: &str,
    min: usize,
    max: usize,
) -> Result<Option<usize>, String> {
    let Some(value) = raw.param(name) else {
        return Ok(None);
    };
    match value.as_int() {
        Some(n) if n >= min as i64 && n <= max as i64 => Ok(Some(n as usize)),
        Some(n) => Err(format!("{} must be in {}..={}, got {}", name, min, max, n)),
        None => Err(format!("{} must be an integer, got {}", name, value)),
    }
}

fn coordinate(raw: &RawInstruction, name: &str) -> Result<Option<i32>, String> {
    let Some(value) = raw.param(name) else {
        return Ok(None);
    };
    value
        .as_int()
        .and_then(|n| i32::try_from(n).ok())
        .filter(|n| *n >= 0)
        .map(Some)
        .ok_or_else(|| format!("{} must be a non-negative integer, got {}", name, value))
}

/// Optional target point; a `0,0` target means none
fn target(raw: &RawInstruction) -> Result<Option<(i32, i32)>, String> {
    match (coordinate(raw, "x")?, coordinate(raw, "y")?) {
        (Some(0), Some(0)) | (None, None) => Ok(None),
        (Some(x), Some(y)) => Ok(Some((x, y))),
        _ => Err("target needs both x and y".to_string()),
    }
}

/// Seconds given as an integer or float
fn timeout(raw: &RawInstruction, name: &str) -> Result<Option<Duration>, String> {
    let Some(value) = raw.param(name) else {
        return Ok(None);
    };
    value
        .as_f64()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .map(Some)
        .ok_or_else(|| format!("{} must be a non-negative number of seconds, got {}", name, value))
}

/// A parsed line ready to run
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptEntry {
    pub raw: RawInstruction,
    pub command: Command,
    /// Source text, for logs
    pub text: String,
}

impl ScriptEntry {
    pub fn line(&self) -> usize {
        self.raw.line
    }
}

/// An ordered instruction list
#[derive(Debug, Default)]
pub struct Script {
    entries: Vec<ScriptEntry>,
    malformed: Vec<ScriptError>,
}

impl Script {
    /// Parse script text. Never fails: malformed lines are dropped and
    /// recorded, unknown opcodes are kept for the executor to skip.
    pub fn parse(text: &str) -> Self {
        let mut script = Script::default();

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let Some(raw) = RawInstruction::parse_line(line, line_no) else {
                continue;
            };

            if raw.extra > 0 {
                log::warn!(
                    "Line {}: ignoring {} extra field(s) for {}",
                    line_no,
                    raw.extra,
                    raw.opcode
                );
            }

            match Command::from_raw(&raw) {
                Ok(command) => script.entries.push(ScriptEntry {
                    raw,
                    command,
                    text: line.trim().to_string(),
                }),
                Err(reason) => {
                    let error = ScriptError::Malformed {
                        line: line_no,
                        reason,
                    };
                    log::warn!("Skipping '{}': {}", line.trim(), error);
                    script.malformed.push(error);
                }
            }
        }

        log::debug!(
            "Parsed {} instruction(s), {} malformed",
            script.entries.len(),
            script.malformed.len()
        );
        script
    }

    /// Read and parse a UTF-8 script file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    pub fn entries(&self) -> &[ScriptEntry] {
        &self.entries
    }

    /// Lines dropped because their values did not fit the opcode
    pub fn malformed(&self) -> &[ScriptError] {
        &self.malformed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Script errors
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Failed to read script: {0}")]
    Io(#[from] std::io::Error),
    #[error("Line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_coercion_order() {
        assert_eq!(Value::coerce("1"), Value::Int(1));
        assert_eq!(Value::coerce("-7"), Value::Int(-7));
        assert_eq!(Value::coerce("1.5"), Value::Float(1.5));
        assert_eq!(Value::coerce("1e2"), Value::Float(100.0));
        assert_eq!(Value::coerce(" front "), Value::Str("front".to_string()));
    }

    #[test]
    fn test_digit_groups() {
        assert_eq!(Value::coerce("1_000"), Value::Int(1000));
        assert_eq!(Value::coerce("-2_500_000"), Value::Int(-2_500_000));
        assert_eq!(Value::coerce("1_0.2_5"), Value::Float(10.25));

        for raw in ["_1", "1_", "1__0", "a_b", "1_.5"] {
            assert_eq!(Value::coerce(raw), Value::Str(raw.to_string()));
        }

        let raw = RawInstruction::parse_line("Click,1_200,7_0", 1).unwrap();
        assert_eq!(Command::from_raw(&raw), Ok(Command::Click { x: 1200, y: 70 }));
    }

    #[test]
    fn test_wait_is_float() {
        let raw = RawInstruction::parse_line("Wait,1.5", 1).unwrap();
        assert_eq!(raw.opcode, "Wait");
        assert_eq!(raw.params, vec![("seconds".to_string(), Value::Float(1.5))]);
        assert_eq!(
            Command::from_raw(&raw),
            Ok(Command::Wait {
                duration: Duration::from_millis(1_500)
            })
        );
    }

    #[test]
    fn test_click_is_int() {
        let raw = RawInstruction::parse_line("Click,100,200", 3).unwrap();
        assert_eq!(raw.opcode, "Click");
        assert_eq!(raw.param("x"), Some(&Value::Int(100)));
        assert_eq!(raw.param("y"), Some(&Value::Int(200)));
        assert_eq!(raw.line, 3);
        assert_eq!(
            Command::from_raw(&raw),
            Ok(Command::Click { x: 100, y: 200 })
        );
    }

    #[test]
    fn test_comments_and_blank_lines() {
        assert!(RawInstruction::parse_line("", 1).is_none());
        assert!(RawInstruction::parse_line("   ", 1).is_none());
        assert!(RawInstruction::parse_line("# Attack", 1).is_none());
    }

    #[test]
    fn test_role_variants() {
        let raw = RawInstruction::parse_line("XRole,2,3,1,500,300", 1).unwrap();
        assert_eq!(
            Command::from_raw(&raw),
            Ok(Command::Role {
                role: 2,
                skill: 3,
                boost: 1,
                target: Some((500, 300)),
                back_row: true,
            })
        );

        let raw = RawInstruction::parse_line("SP,4", 1).unwrap();
        assert_eq!(
            Command::from_raw(&raw),
            Ok(Command::Special {
                role: 4,
                boost: 0,
                target: None,
                back_row: false,
            })
        );
        assert_eq!(Command::from_raw(&raw).unwrap().opcode(), "SP");
    }

    #[test]
    fn test_ill_typed_values() {
        for line in [
            "Role,1.5,1",
            "Role,5,1",
            "Role,1",
            "Role,1,1,9",
            "Role,1,1,0,300",
            "Wait,soon",
            "Wait,-1",
            "Click,100",
            "Switch,sideways",
            "Switch,1",
        ] {
            let raw = RawInstruction::parse_line(line, 1).unwrap();
            assert!(Command::from_raw(&raw).is_err(), "{} should be rejected", line);
        }
    }

    #[test]
    fn test_unknown_opcode_is_kept() {
        let raw = RawInstruction::parse_line("Dance,1,fast", 1).unwrap();
        assert_eq!(
            raw.params,
            vec![
                ("arg0".to_string(), Value::Int(1)),
                ("arg1".to_string(), Value::Str("fast".to_string())),
            ]
        );
        assert_eq!(
            Command::from_raw(&raw),
            Ok(Command::Unknown {
                opcode: "Dance".to_string()
            })
        );
    }

    #[test]
    fn test_opcodes_are_case_sensitive() {
        let raw = RawInstruction::parse_line("wait,1", 1).unwrap();
        assert!(matches!(Command::from_raw(&raw), Ok(Command::Unknown { .. })));
    }

    #[test]
    fn test_script_parse() {
        let script = Script::parse(
            "# opening\n\
             BattleStart,30\n\
             \n\
             Role,1,2\n\
             Wait,oops\n\
             Switch\n\
             Attack,extra\n\
             Dance\n",
        );

        let opcodes: Vec<&str> = script.entries().iter().map(|e| e.command.opcode()).collect();
        assert_eq!(opcodes, vec!["BattleStart", "Role", "Switch", "Attack", "Dance"]);
        assert_eq!(script.entries()[1].line(), 4);
        assert_eq!(script.malformed().len(), 1);
        assert!(matches!(
            script.malformed()[0],
            ScriptError::Malformed { line: 5, .. }
        ));
        assert_eq!(
            script.entries()[2].command,
            Command::Switch { target: None }
        );
        assert_eq!(script.entries()[3].raw.extra, 1);
    }

    #[test]
    fn test_load_script_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("battle.txt");
        fs::write(&path, "BattleStart\nAuto,60\nBattleEnd,300\n").unwrap();

        let script = Script::load(&path).unwrap();
        assert_eq!(script.len(), 3);
        assert_eq!(
            script.entries()[1].command,
            Command::Auto {
                timeout: Some(Duration::from_secs(60))
            }
        );
        assert!(matches!(
            Script::load(dir.path().join("none.txt")),
            Err(ScriptError::Io(_))
        ));
    }
}
