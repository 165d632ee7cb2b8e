//! Document-to-tree compiler
//!
//! Turns a tagged YAML document into an [`Action`] tree. Each local tag maps
//! to exactly one constructor through a lookup table built at startup and
//! never mutated afterwards. Constructors read their field maps through the
//! variant resolver and validate field names against a per-tag schema;
//! unknown fields are a non-fatal warning with a closest-match suggestion.
//!
//! `!include` is resolved here, eagerly: the referenced document compiles
//! with the includer's directory at the front of the search order, so
//! relative includes resolve relative to the includer.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde_yaml::value::TaggedValue;
use tracing::{debug, warn};

use crate::error::RigorError;
use crate::expr::Expr;
use crate::node::{Action, Cmd, ExternalTest, Group, SetVar, Test, Transfer};
use crate::search::SearchPaths;
use crate::suggest;
use crate::template::Template;
use crate::value::{new_scope, ParamMap, Value};
use crate::variant::{RawFields, VariantContext};

/// Per-tag constructor with its declared field schema. Scalar-bodied tags
/// (`!dut`, `!host`) have an empty schema.
struct TagSpec {
    fields: &'static [&'static str],
    build: BuildFn,
}

type BuildFn =
    fn(&Compiler<'_>, &serde_yaml::Value, &BuildCtx<'_>) -> Result<Action, RigorError>;

/// Position of the node being built, for error reporting and includes
struct BuildCtx<'a> {
    doc: &'a str,
    dir: Option<&'a Path>,
}

static REGISTRY: Lazy<BTreeMap<&'static str, TagSpec>> = Lazy::new(|| {
    let mut map = BTreeMap::new();
    map.insert(
        "test",
        TagSpec {
            fields: &["name", "sequence", "setup", "teardown", "parameters", "defaults"],
            build: build_test,
        },
    );
    map.insert(
        "group",
        TagSpec {
            fields: &["name", "children"],
            build: build_group,
        },
    );
    map.insert("dut", TagSpec { fields: &[], build: build_dut });
    map.insert("host", TagSpec { fields: &[], build: build_host });
    map.insert(
        "deploy",
        TagSpec {
            fields: &["src", "dst"],
            build: build_deploy,
        },
    );
    map.insert(
        "fetch",
        TagSpec {
            fields: &["src", "dst"],
            build: build_fetch,
        },
    );
    map.insert(
        "extern",
        TagSpec {
            fields: &["module", "test", "args"],
            build: build_extern,
        },
    );
    map.insert(
        "set",
        TagSpec {
            fields: &["var", "value"],
            build: build_set,
        },
    );
    map.insert(
        "include",
        TagSpec {
            fields: &["path", "parameters"],
            build: build_include,
        },
    );
    map
});

/// Lift a plain (non-action) YAML value into a parameter [`Value`].
/// String scalars containing a `{name}` placeholder become templates;
/// `!eval` becomes a compiled expression and `!remove` the removal sentinel.
pub fn lift_value(v: &serde_yaml::Value) -> Result<Value, RigorError> {
    match v {
        serde_yaml::Value::Null => Ok(Value::Null),
        serde_yaml::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else {
                Ok(Value::Float(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        serde_yaml::Value::String(s) => Ok(match Template::recognize(s) {
            Some(t) => Value::Template(t),
            None => Value::Str(s.clone()),
        }),
        serde_yaml::Value::Sequence(items) => Ok(Value::Seq(
            items.iter().map(lift_value).collect::<Result<_, _>>()?,
        )),
        serde_yaml::Value::Mapping(m) => {
            let mut out = ParamMap::new();
            for (k, v) in m {
                out.insert(key_string(k)?, lift_value(v)?);
            }
            Ok(Value::Map(out))
        }
        serde_yaml::Value::Tagged(t) => match tag_name(t).as_str() {
            "remove" => Ok(Value::Removed),
            "eval" => {
                let src = t.value.as_str().ok_or_else(|| RigorError::ExprParse {
                    source_text: String::new(),
                    detail: "!eval expects a string expression".to_string(),
                })?;
                Ok(Value::Expr(Expr::parse(src)?))
            }
            other => Err(RigorError::ExprParse {
                source_text: format!("!{other}"),
                detail: "action tags are not allowed in value position".to_string(),
            }),
        },
    }
}

fn tag_name(t: &TaggedValue) -> String {
    t.tag.to_string().trim_start_matches('!').to_string()
}

fn key_string(k: &serde_yaml::Value) -> Result<String, RigorError> {
    match k {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(RigorError::compile(
            "<key>",
            format!("non-scalar mapping key: {other:?}"),
        )),
    }
}

/// Compiles documents against a search-path list, an active variant list
/// and the process-wide base parameters (used to render templated include
/// paths at compile time).
pub struct Compiler<'a> {
    pub search: &'a SearchPaths,
    pub variants: &'a VariantContext,
    pub base: &'a ParamMap,
}

impl<'a> Compiler<'a> {
    pub fn new(
        search: &'a SearchPaths,
        variants: &'a VariantContext,
        base: &'a ParamMap,
    ) -> Self {
        Self { search, variants, base }
    }

    /// Locate, merge `_append` extensions, parse and build
    pub fn compile(&self, path: &str, current_dir: Option<&Path>) -> Result<Action, RigorError> {
        let main = self
            .search
            .locate(path, current_dir)
            .ok_or_else(|| RigorError::NotFound { path: path.to_string() })?;

        let mut text = fs::read_to_string(&main)?;
        for append in self.search.locate_all(&format!("{path}_append"), current_dir) {
            debug!("merging append document {}", append.display());
            text.push('\n');
            text.push_str(&fs::read_to_string(&append)?);
        }

        let dir: Option<PathBuf> = main.parent().map(Path::to_path_buf);
        self.compile_str(&text, &main.display().to_string(), dir.as_deref())
    }

    /// Build from already-loaded text (used by `compile` and by tests)
    pub fn compile_str(
        &self,
        text: &str,
        doc: &str,
        dir: Option<&Path>,
    ) -> Result<Action, RigorError> {
        let root: serde_yaml::Value = serde_yaml::from_str(text)?;
        self.build_action(&root, &BuildCtx { doc, dir })
    }

    fn build_action(
        &self,
        v: &serde_yaml::Value,
        ctx: &BuildCtx<'_>,
    ) -> Result<Action, RigorError> {
        let serde_yaml::Value::Tagged(tagged) = v else {
            return Err(RigorError::compile(
                ctx.doc,
                "expected a tagged action node (e.g. !test, !dut, !set)",
            ));
        };

        let tag = tag_name(tagged);
        let spec = REGISTRY.get(tag.as_str()).ok_or_else(|| {
            let detail = match suggest::closest(&tag, REGISTRY.keys().copied()) {
                Some(hint) => format!("unknown tag '!{tag}' (closest known: '!{hint}')"),
                None => format!("unknown tag '!{tag}'"),
            };
            RigorError::compile(ctx.doc, detail)
        })?;

        let action = (spec.build)(self, &tagged.value, ctx)?;
        if !spec.fields.is_empty() {
            if let serde_yaml::Value::Mapping(_) = &tagged.value {
                // spec lookup succeeded, so validation uses the same schema
                self.validate_fields(&self.fields_of(&tagged.value, ctx)?, &tag, spec.fields, ctx);
            }
        }
        Ok(action)
    }

    fn fields_of(
        &self,
        body: &serde_yaml::Value,
        ctx: &BuildCtx<'_>,
    ) -> Result<RawFields<'a>, RigorError> {
        let serde_yaml::Value::Mapping(m) = body else {
            return Err(RigorError::compile(ctx.doc, "expected a mapping body"));
        };
        let mut map = BTreeMap::new();
        for (k, v) in m {
            map.insert(key_string(k)?, v.clone());
        }
        Ok(RawFields::new(map, self.variants))
    }

    /// Unknown fields never abort compilation; they are logged (with a
    /// closest-match suggestion) and treated as inert.
    fn validate_fields(
        &self,
        fields: &RawFields<'_>,
        tag: &str,
        schema: &'static [&'static str],
        ctx: &BuildCtx<'_>,
    ) {
        for key in fields.keys() {
            let known = schema.contains(&key)
                || schema.iter().any(|s| self.variants.is_suffixed_form(key, s));
            if !known {
                match suggest::closest(key, schema.iter().copied()) {
                    Some(hint) => warn!(
                        "{}: unknown field '{}' in !{} (closest known: '{}')",
                        ctx.doc, key, tag, hint
                    ),
                    None => warn!("{}: unknown field '{}' in !{}", ctx.doc, key, tag),
                }
            }
        }
    }

    fn field_string(
        &self,
        fields: &RawFields<'_>,
        name: &str,
        ctx: &BuildCtx<'_>,
    ) -> Result<Option<String>, RigorError> {
        match fields.get(name) {
            None => Ok(None),
            Some(serde_yaml::Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(RigorError::compile(
                ctx.doc,
                format!("field '{name}' must be a string, got {other:?}"),
            )),
        }
    }

    fn field_params(
        &self,
        fields: &RawFields<'_>,
        name: &str,
        ctx: &BuildCtx<'_>,
    ) -> Result<ParamMap, RigorError> {
        match fields.get(name) {
            None | Some(serde_yaml::Value::Null) => Ok(ParamMap::new()),
            Some(v) => match lift_value(v)? {
                Value::Map(m) => Ok(m),
                _ => Err(RigorError::compile(
                    ctx.doc,
                    format!("field '{name}' must be a mapping"),
                )),
            },
        }
    }

    fn field_actions(
        &self,
        fields: &RawFields<'_>,
        name: &str,
        ctx: &BuildCtx<'_>,
    ) -> Result<Vec<Action>, RigorError> {
        match fields.get(name) {
            None | Some(serde_yaml::Value::Null) => Ok(Vec::new()),
            Some(serde_yaml::Value::Sequence(items)) => {
                items.iter().map(|i| self.build_action(i, ctx)).collect()
            }
            Some(_) => Err(RigorError::compile(
                ctx.doc,
                format!("field '{name}' must be a list of actions"),
            )),
        }
    }

    fn scalar_template(
        &self,
        v: &serde_yaml::Value,
        what: &str,
        ctx: &BuildCtx<'_>,
    ) -> Result<Value, RigorError> {
        match v {
            serde_yaml::Value::String(_) => lift_value(v),
            other => Err(RigorError::compile(
                ctx.doc,
                format!("{what} expects a string scalar, got {other:?}"),
            )),
        }
    }
}

fn build_test(c: &Compiler, body: &serde_yaml::Value, ctx: &BuildCtx<'_>) -> Result<Action, RigorError> {
    let fields = c.fields_of(body, ctx)?;
    let mut test = Test::new(c.field_string(&fields, "name", ctx)?);
    test.parameters = c.field_params(&fields, "parameters", ctx)?;
    test.defaults = c.field_params(&fields, "defaults", ctx)?;
    test.setup = c.field_actions(&fields, "setup", ctx)?;
    test.sequence = c.field_actions(&fields, "sequence", ctx)?;
    test.teardown = c.field_actions(&fields, "teardown", ctx)?;
    Ok(Action::Test(test))
}

fn build_group(c: &Compiler, body: &serde_yaml::Value, ctx: &BuildCtx<'_>) -> Result<Action, RigorError> {
    let fields = c.fields_of(body, ctx)?;
    Ok(Action::Group(Group {
        name: c.field_string(&fields, "name", ctx)?,
        children: c.field_actions(&fields, "children", ctx)?,
        scope: new_scope(ParamMap::new()),
    }))
}

fn build_dut(c: &Compiler, body: &serde_yaml::Value, ctx: &BuildCtx<'_>) -> Result<Action, RigorError> {
    Ok(Action::DutCmd(Cmd {
        command: c.scalar_template(body, "!dut", ctx)?,
    }))
}

fn build_host(c: &Compiler, body: &serde_yaml::Value, ctx: &BuildCtx<'_>) -> Result<Action, RigorError> {
    Ok(Action::HostCmd(Cmd {
        command: c.scalar_template(body, "!host", ctx)?,
    }))
}

fn build_transfer(
    c: &Compiler,
    body: &serde_yaml::Value,
    ctx: &BuildCtx<'_>,
    deploy: bool,
) -> Result<Action, RigorError> {
    let fields = c.fields_of(body, ctx)?;
    let sources = match fields.get("src") {
        Some(serde_yaml::Value::Sequence(items)) => items
            .iter()
            .map(|i| c.scalar_template(i, "src entry", ctx))
            .collect::<Result<Vec<_>, _>>()?,
        Some(v @ serde_yaml::Value::String(_)) => vec![c.scalar_template(v, "src", ctx)?],
        _ => {
            return Err(RigorError::compile(
                ctx.doc,
                "transfer needs a 'src' string or list of strings",
            ))
        }
    };
    let dest = match fields.get("dst") {
        Some(v) => c.scalar_template(v, "dst", ctx)?,
        None => return Err(RigorError::compile(ctx.doc, "transfer needs a 'dst' string")),
    };
    Ok(Action::Transfer(Transfer { deploy, sources, dest }))
}

fn build_deploy(c: &Compiler, body: &serde_yaml::Value, ctx: &BuildCtx<'_>) -> Result<Action, RigorError> {
    build_transfer(c, body, ctx, true)
}

fn build_fetch(c: &Compiler, body: &serde_yaml::Value, ctx: &BuildCtx<'_>) -> Result<Action, RigorError> {
    build_transfer(c, body, ctx, false)
}

fn build_extern(c: &Compiler, body: &serde_yaml::Value, ctx: &BuildCtx<'_>) -> Result<Action, RigorError> {
    let fields = c.fields_of(body, ctx)?;
    let module = match fields.get("module") {
        Some(v) => c.scalar_template(v, "module", ctx)?,
        None => return Err(RigorError::compile(ctx.doc, "!extern needs a 'module'")),
    };
    let test = match fields.get("test") {
        Some(v) => c.scalar_template(v, "test", ctx)?,
        None => return Err(RigorError::compile(ctx.doc, "!extern needs a 'test'")),
    };
    Ok(Action::Extern(ExternalTest {
        module,
        test,
        args: c.field_params(&fields, "args", ctx)?,
    }))
}

fn build_set(c: &Compiler, body: &serde_yaml::Value, ctx: &BuildCtx<'_>) -> Result<Action, RigorError> {
    let fields = c.fields_of(body, ctx)?;
    let var = c
        .field_string(&fields, "var", ctx)?
        .ok_or_else(|| RigorError::compile(ctx.doc, "!set needs a 'var' name"))?;
    let value = match fields.get("value") {
        Some(serde_yaml::Value::String(s)) => Expr::parse(s)?,
        Some(serde_yaml::Value::Number(n)) => Expr::parse(&n.to_string())?,
        Some(serde_yaml::Value::Bool(b)) => Expr::parse(&b.to_string())?,
        _ => return Err(RigorError::compile(ctx.doc, "!set needs a 'value' expression")),
    };
    Ok(Action::SetVar(SetVar { var, value, target: None }))
}

fn build_include(c: &Compiler, body: &serde_yaml::Value, ctx: &BuildCtx<'_>) -> Result<Action, RigorError> {
    let fields = c.fields_of(body, ctx)?;
    let raw_path = match fields.get("path") {
        Some(v) => c.scalar_template(v, "path", ctx)?,
        None => return Err(RigorError::compile(ctx.doc, "!include needs a 'path'")),
    };

    // Templated include paths render against the base parameter set; node
    // scopes do not exist yet at compile time.
    let path = match raw_path {
        Value::Str(s) => s,
        Value::Template(mut t) => {
            t.bind(&new_scope(c.base.clone()));
            t.render()
        }
        _ => unreachable!("scalar_template yields Str or Template"),
    };

    let mut included = c.compile(&path, ctx.dir)?;

    let overrides = c.field_params(&fields, "parameters", ctx)?;
    if !overrides.is_empty() {
        match &mut included {
            Action::Test(t) => t.parameters = overrides,
            _ => warn!(
                "{}: include parameters ignored: '{}' does not compile to a !test root",
                ctx.doc, path
            ),
        }
    }
    Ok(included)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler_parts() -> (SearchPaths, VariantContext, ParamMap) {
        (SearchPaths::new(), VariantContext::new(["evk"]), ParamMap::new())
    }

    fn compile_one(yaml: &str) -> Result<Action, RigorError> {
        let (search, variants, base) = compiler_parts();
        let c = Compiler::new(&search, &variants, &base);
        c.compile_str(yaml, "<test>", None)
    }

    #[test]
    fn compiles_minimal_test() {
        let action = compile_one(
            r#"!test
name: smoke
sequence:
  - !dut "uname -a"
  - !host "echo done"
"#,
        )
        .unwrap();
        let Action::Test(t) = action else { panic!("expected test") };
        assert_eq!(t.name.as_deref(), Some("smoke"));
        assert_eq!(t.sequence.len(), 2);
        assert!(t.setup.is_empty());
        assert!(t.teardown.is_empty());
    }

    #[test]
    fn templated_scalar_becomes_lazy() {
        let action = compile_one("!dut \"echo {v}\"").unwrap();
        let Action::DutCmd(cmd) = action else { panic!() };
        assert!(matches!(cmd.command, Value::Template(_)));

        let action = compile_one("!dut \"echo plain\"").unwrap();
        let Action::DutCmd(cmd) = action else { panic!() };
        assert!(matches!(cmd.command, Value::Str(_)));
    }

    #[test]
    fn variant_override_selects_suffixed_field() {
        let action = compile_one(
            r#"!test
name: base
name_evk: evk-name
sequence: []
"#,
        )
        .unwrap();
        let Action::Test(t) = action else { panic!() };
        assert_eq!(t.name.as_deref(), Some("evk-name"));
    }

    #[test]
    fn unknown_field_is_non_fatal() {
        let action = compile_one(
            r#"!test
name: ok
sequnce: []
"#,
        );
        assert!(action.is_ok());
    }

    #[test]
    fn unknown_tag_is_fatal_with_suggestion() {
        let err = compile_one("!teste {name: x}").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("teste"));
        assert!(msg.contains("closest known: '!test'"));
    }

    #[test]
    fn untagged_action_position_is_fatal() {
        assert!(compile_one("just a string").is_err());
    }

    #[test]
    fn remove_sentinel_and_eval_lift() {
        let action = compile_one(
            r#"!test
parameters:
  gone: !remove
  derived: !eval "1 + 2"
sequence: []
"#,
        )
        .unwrap();
        let Action::Test(t) = action else { panic!() };
        assert_eq!(t.parameters.get("gone"), Some(&Value::Removed));
        assert!(matches!(t.parameters.get("derived"), Some(Value::Expr(_))));
    }

    #[test]
    fn bad_set_expression_is_fatal() {
        let err = compile_one("!set {var: v, value: \"1 +\"}").unwrap_err();
        assert!(matches!(err, RigorError::ExprParse { .. }));
    }

    #[test]
    fn transfer_accepts_single_or_list_sources() {
        let one = compile_one("!deploy {src: \"a.bin\", dst: \"/tmp\"}").unwrap();
        let Action::Transfer(t) = one else { panic!() };
        assert!(t.deploy);
        assert_eq!(t.sources.len(), 1);

        let many = compile_one("!fetch {src: [\"a\", \"b\"], dst: \"/tmp\"}").unwrap();
        let Action::Transfer(t) = many else { panic!() };
        assert!(!t.deploy);
        assert_eq!(t.sources.len(), 2);
    }

    #[test]
    fn group_of_tests() {
        let action = compile_one(
            r#"!group
name: suite
children:
  - !test {name: a, sequence: []}
  - !test {name: b, sequence: []}
"#,
        )
        .unwrap();
        let Action::Group(g) = action else { panic!() };
        assert_eq!(g.children.len(), 2);
    }

    #[test]
    fn include_of_missing_document_names_offending_path() {
        let err = compile_one("!include {path: no_such_doc.yaml}").unwrap_err();
        let RigorError::NotFound { path } = err else { panic!("expected NotFound") };
        assert_eq!(path, "no_such_doc.yaml");
    }
}
