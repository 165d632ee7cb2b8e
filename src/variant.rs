//! Variant-suffixed field overrides
//!
//! A document field may be declared several times with `_<variant>` suffixes
//! (`cmd`, `cmd_evk`, `cmd_imx8mm`, ...). The active variant list picks the
//! most specific declaration; earlier variants win. Suffixed keys are only
//! ever consulted through [`RawFields`], never accessed directly.

use std::collections::BTreeMap;

/// Ordered list of active variant tags (board/hardware identifiers).
/// Read-only for the duration of a run.
#[derive(Debug, Clone, Default)]
pub struct VariantContext {
    tags: Vec<String>,
}

impl VariantContext {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    /// Variant tags in precedence order (earlier wins)
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    /// Whether `key` is `base` plus an active-variant suffix
    pub fn is_suffixed_form(&self, key: &str, base: &str) -> bool {
        self.tags.iter().any(|t| {
            key.len() == base.len() + 1 + t.len()
                && key.starts_with(base)
                && key[base.len()..].strip_prefix('_') == Some(t.as_str())
        })
    }
}

/// String-keyed field map lifted from a YAML mapping node, read through
/// the variant resolver.
#[derive(Debug)]
pub struct RawFields<'v> {
    map: BTreeMap<String, serde_yaml::Value>,
    variants: &'v VariantContext,
}

impl<'v> RawFields<'v> {
    pub fn new(map: BTreeMap<String, serde_yaml::Value>, variants: &'v VariantContext) -> Self {
        Self { map, variants }
    }

    /// Resolve `name` against the active variants: the first
    /// `name_<variant>` present wins, then the plain `name`.
    pub fn get(&self, name: &str) -> Option<&serde_yaml::Value> {
        for tag in self.variants.tags() {
            if let Some(v) = self.map.get(&format!("{name}_{tag}")) {
                return Some(v);
            }
        }
        self.map.get(name)
    }

    /// All declared keys, for schema validation
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn variants(&self) -> &VariantContext {
        self.variants
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    fn fields<'v>(
        pairs: &[(&str, &str)],
        variants: &'v VariantContext,
    ) -> RawFields<'v> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        RawFields::new(map, variants)
    }

    #[test]
    fn suffixed_key_wins_over_plain() {
        let vc = VariantContext::new(["evk", "imx8mm"]);
        let f = fields(&[("cmd", "base"), ("cmd_evk", "override")], &vc);
        assert_eq!(f.get("cmd").unwrap().as_str(), Some("override"));
    }

    #[test]
    fn declaration_order_is_irrelevant() {
        let vc = VariantContext::new(["evk"]);
        let f = fields(&[("cmd_evk", "override"), ("cmd", "base")], &vc);
        assert_eq!(f.get("cmd").unwrap().as_str(), Some("override"));
    }

    #[test]
    fn earlier_variant_wins() {
        let vc = VariantContext::new(["evk", "seb"]);
        let f = fields(&[("cmd_seb", "second"), ("cmd_evk", "first")], &vc);
        assert_eq!(f.get("cmd").unwrap().as_str(), Some("first"));
    }

    #[test]
    fn falls_back_to_plain_then_none() {
        let vc = VariantContext::new(["evk"]);
        let f = fields(&[("cmd", "base")], &vc);
        assert_eq!(f.get("cmd").unwrap().as_str(), Some("base"));
        assert!(f.get("missing").is_none());
    }

    #[test]
    fn inactive_variant_suffix_is_not_resolved() {
        let vc = VariantContext::new(["evk"]);
        let f = fields(&[("cmd_rpi4", "other")], &vc);
        assert!(f.get("cmd").is_none());
    }

    #[test]
    fn suffixed_form_detection() {
        let vc = VariantContext::new(["evk", "imx8mm"]);
        assert!(vc.is_suffixed_form("cmd_evk", "cmd"));
        assert!(vc.is_suffixed_form("cmd_imx8mm", "cmd"));
        assert!(!vc.is_suffixed_form("cmd_rpi4", "cmd"));
        assert!(!vc.is_suffixed_form("cmdevk", "cmd"));
    }
}
