//! Process-wide run configuration
//!
//! The base parameter set and the active variant list come from an optional
//! YAML config file, with CLI flags layered on top (flags win).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::compile::lift_value;
use crate::error::RigorError;
use crate::value::ParamMap;
use crate::variant::VariantContext;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Active variant tags in precedence order (earlier wins)
    #[serde(default)]
    pub variants: Vec<String>,
    /// Default parameters visible at the tree root
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_yaml::Value>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, RigorError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Apply CLI overrides: extra variants are appended after the config's
    /// own, `key=value` pairs are parsed as YAML scalars and win over the
    /// config file.
    pub fn apply_overrides(
        &mut self,
        variants: &[String],
        params: &[String],
    ) -> Result<(), RigorError> {
        self.variants.extend(variants.iter().cloned());
        for pair in params {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(RigorError::compile(
                    "<cli>",
                    format!("--param expects key=value, got '{pair}'"),
                ));
            };
            let value: serde_yaml::Value = serde_yaml::from_str(value)?;
            self.parameters.insert(key.to_string(), value);
        }
        Ok(())
    }

    pub fn variant_context(&self) -> VariantContext {
        VariantContext::new(self.variants.iter().cloned())
    }

    pub fn base_params(&self) -> Result<ParamMap, RigorError> {
        self.parameters
            .iter()
            .map(|(k, v)| Ok((k.clone(), lift_value(v)?)))
            .collect()
    }
}
