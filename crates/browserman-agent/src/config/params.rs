use crate::{Error, Result};
use std::collections::HashMap;

/// Values for `${name}` placeholders in a config file.
///
/// Explicit values win; anything else is looked up in the process
/// environment.
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: HashMap<String, String>,
    use_env: bool,
}

impl Params {
    /// Params backed by the process environment.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            use_env: true,
        }
    }

    /// Params that never consult the environment.
    pub fn isolated() -> Self {
        Self::default()
    }

    /// Set a parameter value.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Resolve a parameter.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(v) = self.values.get(key) {
            return Some(v.clone());
        }
        if self.use_env {
            return std::env::var(key).ok();
        }
        None
    }

    /// Parse from CLI args like "key=value".
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut params = Self::new();
        for arg in args {
            let (key, value) = arg.split_once('=').ok_or_else(|| {
                Error::Config(format!("invalid param '{}', expected key=value", arg))
            })?;
            params.values.insert(key.to_string(), value.to_string());
        }
        Ok(params)
    }
}

/// Substitute `${var}` patterns in a string. Unknown names are left as-is.
pub fn substitute(template: &str, params: &Params) -> String {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(var_start) = result[start..].find("${") {
        let var_start = start + var_start;
        let Some(var_end) = result[var_start..].find('}') else {
            break;
        };
        let var_end = var_start + var_end;

        let Some(value) = params.get(&result[var_start + 2..var_end]) else {
            start = var_end + 1;
            continue;
        };

        result.replace_range(var_start..=var_end, &value);
        start = var_start + value.len();
    }

    result
}

/// Recursively substitute params in a serde_yaml::Value.
pub fn substitute_value(value: &mut serde_yaml::Value, params: &Params) {
    match value {
        serde_yaml::Value::String(s) => {
            *s = substitute(s, params);
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                substitute_value(v, params);
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for v in seq.iter_mut() {
                substitute_value(v, params);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_simple() {
        let params = Params::isolated().set("host", "gpu-box");
        assert_eq!(
            substitute("http://${host}:8000/inference", &params),
            "http://gpu-box:8000/inference"
        );
    }

    #[test]
    fn test_substitute_unknown_left_alone() {
        let params = Params::isolated().set("a", "1");
        assert_eq!(substitute("${a}-${b}-${a}", &params), "1-${b}-1");
        assert_eq!(substitute("${unterminated", &params), "${unterminated");
    }

    #[test]
    fn test_substitute_from_env() {
        std::env::set_var("BROWSERMAN_TEST_PARAM_TOKEN", "s3cret");
        let params = Params::new();
        assert_eq!(
            substitute("Bearer ${BROWSERMAN_TEST_PARAM_TOKEN}", &params),
            "Bearer s3cret"
        );
        let explicit = Params::new().set("BROWSERMAN_TEST_PARAM_TOKEN", "override");
        assert_eq!(
            substitute("${BROWSERMAN_TEST_PARAM_TOKEN}", &explicit),
            "override"
        );
    }

    #[test]
    fn test_params_from_args() {
        let args = vec!["model=llama".to_string(), "port=9000".to_string()];
        let params = Params::from_args(&args).unwrap();
        assert_eq!(params.get("model").as_deref(), Some("llama"));
        assert_eq!(params.get("port").as_deref(), Some("9000"));
        assert!(Params::from_args(&["novalue".to_string()]).is_err());
    }
}
