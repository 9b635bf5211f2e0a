use std::collections::BTreeMap;
use std::ffi::OsString;

use serde_json::Value;
use tracing::debug;

/// Free-form per-model options, sent verbatim to remote endpoints and mapped to flags locally
pub type ModelOptions = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    /// Emitted as a bare flag when the option is truthy
    Switch { default: bool },
    /// Emitted as `--flag value`
    Value { default: &'static str },
}

/// Maps one option name to at most one command line flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionFlag {
    pub option: &'static str,
    pub flag: &'static str,
    pub kind: FlagKind,
}

impl OptionFlag {
    pub const fn switch(option: &'static str, flag: &'static str, default: bool) -> Self {
        Self {
            option,
            flag,
            kind: FlagKind::Switch { default },
        }
    }

    pub const fn value(option: &'static str, flag: &'static str, default: &'static str) -> Self {
        Self {
            option,
            flag,
            kind: FlagKind::Value { default },
        }
    }

    fn render(&self, value: Option<&Value>) -> Vec<OsString> {
        let value = value.filter(|v| !v.is_null());
        match self.kind {
            FlagKind::Switch { default } => {
                if value.map_or(default, is_truthy) {
                    vec![self.flag.into()]
                } else {
                    vec![]
                }
            }
            FlagKind::Value { default } => match value {
                None | Some(Value::Bool(true)) => vec![self.flag.into(), default.into()],
                Some(Value::String(s)) if s.is_empty() => vec![],
                Some(Value::String(s)) => vec![self.flag.into(), s.into()],
                Some(Value::Number(n)) => vec![self.flag.into(), n.to_string().into()],
                // `false` disables the option altogether
                Some(Value::Bool(false)) => vec![],
                Some(other) => {
                    debug!(option = self.option, value = %other, "Ignoring non-scalar option value");
                    vec![]
                }
            },
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        Value::String(s) => !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Renders `options` through `table` in table order. Options without a table entry produce no flag.
pub fn to_flags(table: &[OptionFlag], options: &ModelOptions) -> Vec<OsString> {
    for key in options.keys() {
        if !table.iter().any(|entry| entry.option == key) {
            debug!(option = %key, "Option has no command line flag");
        }
    }

    table
        .iter()
        .flat_map(|entry| entry.render(options.get(entry.option)))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const TABLE: &[OptionFlag] = &[
        OptionFlag::switch("still_mode", "--still", true),
        OptionFlag::switch("nosmooth", "--nosmooth", false),
        OptionFlag::value("preprocess", "--preprocess", "crop"),
        OptionFlag::value("pose_style", "--pose_style", "0"),
    ];

    fn options(value: Value) -> ModelOptions {
        serde_json::from_value(value).unwrap()
    }

    fn rendered(options: &ModelOptions) -> Vec<String> {
        to_flags(TABLE, options)
            .into_iter()
            .map(|s| s.into_string().unwrap())
            .collect()
    }

    #[test]
    fn absent_options_use_defaults() {
        assert_eq!(
            rendered(&ModelOptions::new()),
            vec!["--still", "--preprocess", "crop", "--pose_style", "0"]
        );
    }

    #[test]
    fn booleans_toggle_presence() {
        let opts = options(json!({"still_mode": false, "nosmooth": true}));
        assert_eq!(
            rendered(&opts),
            vec!["--nosmooth", "--preprocess", "crop", "--pose_style", "0"]
        );
    }

    #[test]
    fn values_become_name_value_pairs() {
        let opts = options(json!({"preprocess": "full", "pose_style": 12}));
        assert_eq!(
            rendered(&opts),
            vec!["--still", "--preprocess", "full", "--pose_style", "12"]
        );
    }

    #[test]
    fn null_falls_back_and_empty_disables() {
        let opts = options(json!({"preprocess": "", "pose_style": null}));
        assert_eq!(rendered(&opts), vec!["--still", "--pose_style", "0"]);
    }

    #[test]
    fn unknown_and_nested_options_emit_nothing() {
        let opts = options(json!({"quality": "high", "pose_style": [1, 2]}));
        assert_eq!(rendered(&opts), vec!["--still", "--preprocess", "crop"]);
    }
}
