//! Driver source scanner.
//!
//! Walks a directory of driver source files and describes every driver type found in
//! them. The analysis is purely syntactic: files are parsed with `syn` and never compiled
//! or executed, so a driver whose vendor library is missing on this machine is still
//! discovered.
//!
//! # What counts as a driver
//!
//! A top-level `struct` is a driver when the `impl` blocks for it *in the same file*
//! define all three lifecycle methods (`initialize`, `shutdown`, `is_opened`), either
//! inherently or as part of a trait impl. Exposed functions are the `pub` inherent
//! methods taking `self`, minus the lifecycle methods and names starting with `_`.
//!
//! # Parameters
//!
//! Rust has no default argument values, so `Option<T>` parameters are reported as keyword
//! parameters with default `None`; every other parameter is positional and required.
//! When a parameter's type is a fieldless `enum` declared in the same file, its accepted
//! string values are reported as `choices`.
//!
//! # Failure isolation
//!
//! A missing directory, an unreadable file or a file with syntax errors contributes zero
//! descriptors. Nothing in this module returns an error.

mod render;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use syn::{FnArg, ImplItem, Item, Pat, Signature, Type, Visibility};
use tracing::debug;

pub use render::{apply_rename_rule, render_type};

/// Methods every driver must define.
pub const LIFECYCLE_METHODS: [&str; 3] = ["initialize", "shutdown", "is_opened"];

/// Package initializer files that are never scanned.
pub const PACKAGE_INITIALIZERS: [&str; 2] = ["mod.rs", "lib.rs"];

/// Associated function treated as the constructor.
pub const CONSTRUCTOR: &str = "new";

/// Metadata for one parameter of a constructor or exposed function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamMeta {
    /// Parameter name
    pub name: String,
    /// Type as written in the source
    #[serde(rename = "type")]
    pub ty: Option<String>,
    /// Default value, when the parameter has one
    pub default: Option<String>,
    /// Accepted values of an enum-typed parameter
    pub choices: Option<Vec<String>>,
}

/// One exposed method of a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedFunction {
    /// Method name
    pub name: String,
    /// Rendered signature
    pub signature: String,
    /// Doc comment text
    pub doc: Option<String>,
    /// Parameters in declaration order
    pub params: Vec<ParamMeta>,
}

/// A driver type discovered in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDriver {
    /// File name inside the driver directory (e.g. `sim_synth.rs`)
    pub file: String,
    /// File stem, the driver's module identity
    pub module: String,
    /// Type name
    pub class_name: String,
    /// Doc comment of the type
    pub class_doc: Option<String>,
    /// Required constructor parameters
    pub init_positional: Vec<ParamMeta>,
    /// `Option`-typed constructor parameters
    pub init_keyword: Vec<ParamMeta>,
    /// Exposed methods in declaration order
    pub functions: Vec<ScannedFunction>,
}

impl ScannedDriver {
    /// Exposed function names in declaration order.
    pub fn function_names(&self) -> Vec<String> {
        self.functions.iter().map(|f| f.name.clone()).collect()
    }
}

/// Scans every driver source in `dir`, in file-name order.
pub fn scan_directory(dir: &Path) -> Vec<ScannedDriver> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Driver directory {} not readable: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_driver_source(path))
        .collect();
    files.sort();

    files.iter().flat_map(|path| scan_file(path)).collect()
}

/// True for `*.rs` files that are not package initializers.
pub fn is_driver_source(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.ends_with(".rs") && !PACKAGE_INITIALIZERS.contains(&name)
}

/// Scans a single file; unreadable files yield nothing.
pub fn scan_file(path: &Path) -> Vec<ScannedDriver> {
    let (Some(file), Some(module)) = (
        path.file_name().and_then(|n| n.to_str()),
        path.file_stem().and_then(|n| n.to_str()),
    ) else {
        return Vec::new();
    };

    match std::fs::read_to_string(path) {
        Ok(source) => scan_source(file, module, &source),
        Err(e) => {
            debug!("Skipping unreadable driver file {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

struct MethodDef<'a> {
    sig: &'a Signature,
    attrs: &'a [syn::Attribute],
    exposed: bool,
}

/// Scans source text that would live in `file` (module `module`).
pub fn scan_source(file: &str, module: &str, source: &str) -> Vec<ScannedDriver> {
    let ast = match syn::parse_file(source) {
        Ok(ast) => ast,
        Err(e) => {
            debug!("Skipping {}: not valid Rust source ({})", file, e);
            return Vec::new();
        }
    };

    let enums = render::closed_enums(&ast.items);

    let mut methods: HashMap<String, Vec<MethodDef<'_>>> = HashMap::new();
    for item in &ast.items {
        let Item::Impl(block) = item else {
            continue;
        };
        let Some(type_name) = self_type_name(&block.self_ty) else {
            continue;
        };
        let inherent = block.trait_.is_none();
        for impl_item in &block.items {
            if let ImplItem::Fn(f) = impl_item {
                methods.entry(type_name.clone()).or_default().push(MethodDef {
                    sig: &f.sig,
                    attrs: &f.attrs,
                    exposed: inherent && matches!(f.vis, Visibility::Public(_)),
                });
            }
        }
    }

    let mut out = Vec::new();
    for item in &ast.items {
        let Item::Struct(s) = item else {
            continue;
        };
        let class_name = s.ident.to_string();
        let Some(defs) = methods.get(&class_name) else {
            continue;
        };

        let defined = |name: &str| defs.iter().any(|m| m.sig.ident == name);
        if !LIFECYCLE_METHODS.iter().all(|m| defined(m)) {
            debug!(
                "{}::{} lacks a lifecycle method, not a driver",
                module, class_name
            );
            continue;
        }

        let (init_positional, init_keyword) = defs
            .iter()
            .find(|m| m.sig.ident == CONSTRUCTOR && m.sig.receiver().is_none())
            .map(|ctor| split_constructor_params(ctor.sig, &enums))
            .unwrap_or_default();

        let mut functions: Vec<ScannedFunction> = Vec::new();
        for def in defs {
            let name = def.sig.ident.to_string();
            if !def.exposed
                || def.sig.receiver().is_none()
                || LIFECYCLE_METHODS.contains(&name.as_str())
                || name.starts_with('_')
                || functions.iter().any(|f| f.name == name)
            {
                continue;
            }
            let params = fn_params(def.sig, &enums);
            functions.push(ScannedFunction {
                signature: render_signature(&params),
                doc: render::doc_comment(def.attrs),
                name,
                params,
            });
        }

        out.push(ScannedDriver {
            file: file.to_string(),
            module: module.to_string(),
            class_doc: render::doc_comment(&s.attrs),
            class_name,
            init_positional,
            init_keyword,
            functions,
        });
    }
    out
}

fn self_type_name(ty: &Type) -> Option<String> {
    match ty {
        Type::Path(tp) => tp.path.segments.last().map(|s| s.ident.to_string()),
        _ => None,
    }
}

fn fn_params(sig: &Signature, enums: &HashMap<String, Vec<String>>) -> Vec<ParamMeta> {
    sig.inputs
        .iter()
        .enumerate()
        .filter_map(|(index, arg)| match arg {
            FnArg::Receiver(_) => None,
            FnArg::Typed(pt) => {
                let name = match pt.pat.as_ref() {
                    Pat::Ident(ident) => ident.ident.to_string(),
                    Pat::Wild(_) => "_".to_string(),
                    _ => format!("arg{index}"),
                };
                let choices = render::core_type_name(&pt.ty).and_then(|n| enums.get(&n).cloned());
                Some(ParamMeta {
                    name,
                    ty: render::render_type(&pt.ty),
                    default: render::is_option(&pt.ty).then(|| "None".to_string()),
                    choices,
                })
            }
        })
        .collect()
}

fn split_constructor_params(
    sig: &Signature,
    enums: &HashMap<String, Vec<String>>,
) -> (Vec<ParamMeta>, Vec<ParamMeta>) {
    fn_params(sig, enums)
        .into_iter()
        .partition(|p| p.default.is_none())
}

/// Compact call signature, e.g. `(mode, channel=None)`.
pub fn render_signature(params: &[ParamMeta]) -> String {
    let parts: Vec<String> = params
        .iter()
        .map(|p| match &p.default {
            Some(default) => format!("{}={}", p.name, default),
            None => p.name.clone(),
        })
        .collect();
    format!("({})", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAVEMETER: &str = r#"
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureMode {
    Auto,
    Manual,
}

/// Simulated wavelength meter.
pub struct Meter {
    channels: u32,
}

impl Meter {
    pub fn new(devpath: String, channels: Option<u32>) -> Self {
        Meter { channels: channels.unwrap_or(8) }
    }

    /// Reads the wavelength in nm.
    pub fn get_wavelength(&self, channel: Option<u32>) -> Result<f64, DriverError> {
        Ok(780.0)
    }

    pub fn set_exposure_mode(&self, mode: ExposureMode, channel: Option<u32>) {}

    pub fn _raw(&self) {}

    fn require_open(&self) {}

    pub fn helper() -> u8 { 0 }
}

impl Driver for Meter {
    fn initialize(&self) -> InitReport { InitReport::ok("ready") }
    fn shutdown(&self) {}
    fn is_opened(&self) -> bool { true }
}
"#;

    #[test]
    fn discovers_driver_with_lifecycle_methods() {
        let drivers = scan_source("meter.rs", "meter", WAVEMETER);
        assert_eq!(drivers.len(), 1);
        let d = &drivers[0];
        assert_eq!(d.file, "meter.rs");
        assert_eq!(d.module, "meter");
        assert_eq!(d.class_name, "Meter");
        assert_eq!(d.class_doc.as_deref(), Some("Simulated wavelength meter."));
        assert_eq!(
            d.function_names(),
            vec!["get_wavelength".to_string(), "set_exposure_mode".to_string()]
        );
    }

    #[test]
    fn constructor_params_are_split_by_optionality() {
        let d = &scan_source("meter.rs", "meter", WAVEMETER)[0];
        assert_eq!(d.init_positional.len(), 1);
        assert_eq!(d.init_positional[0].name, "devpath");
        assert_eq!(d.init_positional[0].ty.as_deref(), Some("String"));
        assert_eq!(d.init_positional[0].default, None);

        assert_eq!(d.init_keyword.len(), 1);
        assert_eq!(d.init_keyword[0].name, "channels");
        assert_eq!(d.init_keyword[0].ty.as_deref(), Some("Option<u32>"));
        assert_eq!(d.init_keyword[0].default.as_deref(), Some("None"));
    }

    #[test]
    fn function_metadata_includes_signature_doc_and_choices() {
        let d = &scan_source("meter.rs", "meter", WAVEMETER)[0];
        let read = &d.functions[0];
        assert_eq!(read.signature, "(channel=None)");
        assert_eq!(read.doc.as_deref(), Some("Reads the wavelength in nm."));

        let set = &d.functions[1];
        assert_eq!(set.signature, "(mode, channel=None)");
        assert_eq!(
            set.params[0].choices,
            Some(vec!["auto".to_string(), "manual".to_string()])
        );
        assert_eq!(set.params[0].ty.as_deref(), Some("ExposureMode"));
        assert_eq!(set.params[1].choices, None);
    }

    #[test]
    fn type_missing_a_lifecycle_method_is_rejected() {
        let src = r#"
pub struct Half;
impl Half {
    pub fn initialize(&self) {}
    pub fn is_opened(&self) -> bool { false }
    pub fn ping(&self) {}
}
"#;
        assert!(scan_source("half.rs", "half", src).is_empty());
    }

    #[test]
    fn lifecycle_methods_on_another_type_do_not_count() {
        let src = r#"
pub struct Shell;
pub struct Inner;
impl Shell { pub fn ping(&self) {} }
impl Inner {
    pub fn initialize(&self) {}
    pub fn shutdown(&self) {}
    pub fn is_opened(&self) -> bool { true }
}
"#;
        let drivers = scan_source("two.rs", "two", src);
        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0].class_name, "Inner");
        assert!(drivers[0].functions.is_empty());
    }

    #[test]
    fn syntax_errors_yield_nothing() {
        assert!(scan_source("bad.rs", "bad", "pub struct Broken { impl").is_empty());
    }

    #[test]
    fn directory_scan_skips_initializer_and_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("meter.rs"), WAVEMETER).unwrap();
        std::fs::write(dir.path().join("mod.rs"), WAVEMETER).unwrap();
        std::fs::write(dir.path().join("broken.rs"), "fn (").unwrap();
        std::fs::write(dir.path().join("notes.txt"), WAVEMETER).unwrap();

        let drivers = scan_directory(dir.path());
        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0].module, "meter");
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_directory(&dir.path().join("nope")).is_empty());
    }
}
