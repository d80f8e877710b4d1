//! Textual rendering helpers for the syntax tree.
//!
//! Everything here works on `syn` nodes only. Types are rendered in their short form:
//! path qualifiers are stripped (`std::string::String` becomes `String`) while generic
//! arguments are kept (`Option<u32>`).

use std::collections::HashMap;
use syn::{
    Attribute, Expr, ExprLit, Fields, GenericArgument, Item, Lit, LitStr, Meta, PathArguments,
    ReturnType, Token, Type, TypeParamBound,
};

/// Collects `///` doc comment lines into one string, `None` when there are none.
pub fn doc_comment(attrs: &[Attribute]) -> Option<String> {
    let lines: Vec<String> = attrs
        .iter()
        .filter(|attr| attr.path().is_ident("doc"))
        .filter_map(|attr| match &attr.meta {
            Meta::NameValue(nv) => match &nv.value {
                Expr::Lit(ExprLit {
                    lit: Lit::Str(s), ..
                }) => Some(s.value()),
                _ => None,
            },
            _ => None,
        })
        .map(|line| line.strip_prefix(' ').unwrap_or(&line).trim_end().to_string())
        .collect();

    let joined = lines.join("\n");
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Renders a type without namespace qualifiers. `None` for forms we do not describe
/// (macros in type position, bare function pointers, ...).
pub fn render_type(ty: &Type) -> Option<String> {
    match ty {
        Type::Path(tp) if tp.qself.is_none() => {
            let segment = tp.path.segments.last()?;
            let mut out = segment.ident.to_string();
            match &segment.arguments {
                PathArguments::None => {}
                PathArguments::AngleBracketed(args) => {
                    let rendered: Vec<String> = args
                        .args
                        .iter()
                        .map(|arg| match arg {
                            GenericArgument::Type(t) => {
                                render_type(t).unwrap_or_else(|| "_".to_string())
                            }
                            GenericArgument::Lifetime(lt) => format!("'{}", lt.ident),
                            GenericArgument::Const(expr) => render_expr(expr),
                            _ => "_".to_string(),
                        })
                        .collect();
                    out.push('<');
                    out.push_str(&rendered.join(", "));
                    out.push('>');
                }
                PathArguments::Parenthesized(args) => {
                    let inputs: Vec<String> = args
                        .inputs
                        .iter()
                        .map(|t| render_type(t).unwrap_or_else(|| "_".to_string()))
                        .collect();
                    out.push('(');
                    out.push_str(&inputs.join(", "));
                    out.push(')');
                    if let ReturnType::Type(_, ret) = &args.output {
                        out.push_str(" -> ");
                        out.push_str(&render_type(ret).unwrap_or_else(|| "_".to_string()));
                    }
                }
            }
            Some(out)
        }
        Type::Reference(r) => {
            let inner = render_type(&r.elem)?;
            if r.mutability.is_some() {
                Some(format!("&mut {inner}"))
            } else {
                Some(format!("&{inner}"))
            }
        }
        Type::Slice(s) => Some(format!("[{}]", render_type(&s.elem)?)),
        Type::Array(a) => Some(format!("[{}; {}]", render_type(&a.elem)?, render_expr(&a.len))),
        Type::Tuple(t) => {
            let parts: Option<Vec<String>> = t.elems.iter().map(render_type).collect();
            Some(format!("({})", parts?.join(", ")))
        }
        Type::Paren(p) => render_type(&p.elem),
        Type::Group(g) => render_type(&g.elem),
        Type::ImplTrait(it) => Some(format!("impl {}", render_bounds(it.bounds.iter()))),
        Type::TraitObject(to) => Some(format!("dyn {}", render_bounds(to.bounds.iter()))),
        Type::Never(_) => Some("!".to_string()),
        Type::Infer(_) => Some("_".to_string()),
        _ => None,
    }
}

fn render_bounds<'a>(bounds: impl Iterator<Item = &'a TypeParamBound>) -> String {
    bounds
        .filter_map(|bound| match bound {
            TypeParamBound::Trait(tb) => {
                let ty = Type::Path(syn::TypePath {
                    qself: None,
                    path: tb.path.clone(),
                });
                render_type(&ty)
            }
            TypeParamBound::Lifetime(lt) => Some(format!("'{}", lt.ident)),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" + ")
}

/// Best-effort source text for a constant expression, `...` when unrenderable.
pub fn render_expr(expr: &Expr) -> String {
    match expr {
        Expr::Lit(ExprLit { lit, .. }) => match lit {
            Lit::Str(s) => format!("{:?}", s.value()),
            Lit::Int(i) => i.base10_digits().to_string(),
            Lit::Float(f) => f.base10_digits().to_string(),
            Lit::Bool(b) => b.value.to_string(),
            Lit::Char(c) => format!("{:?}", c.value()),
            _ => "...".to_string(),
        },
        Expr::Path(p) => p
            .path
            .segments
            .last()
            .map(|s| s.ident.to_string())
            .unwrap_or_else(|| "...".to_string()),
        Expr::Unary(u) => match &u.op {
            syn::UnOp::Neg(_) => format!("-{}", render_expr(&u.expr)),
            _ => "...".to_string(),
        },
        _ => "...".to_string(),
    }
}

/// True when the outermost type is `Option<...>` (any qualification).
pub fn is_option(ty: &Type) -> bool {
    option_inner(ty).is_some()
}

fn option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(tp) = ty else {
        return None;
    };
    let segment = tp.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}

/// Name of the nominal type behind references, parentheses and one `Option` layer.
pub fn core_type_name(ty: &Type) -> Option<String> {
    match ty {
        Type::Reference(r) => core_type_name(&r.elem),
        Type::Paren(p) => core_type_name(&p.elem),
        Type::Group(g) => core_type_name(&g.elem),
        Type::Path(tp) => {
            if let Some(inner) = option_inner(ty) {
                return core_type_name(inner);
            }
            tp.path.segments.last().map(|s| s.ident.to_string())
        }
        _ => None,
    }
}

/// Fieldless enums declared at the top level of a file, mapped to the string values
/// they accept on the wire (serde renames applied).
pub fn closed_enums(items: &[Item]) -> HashMap<String, Vec<String>> {
    let mut out = HashMap::new();
    for item in items {
        let Item::Enum(e) = item else {
            continue;
        };
        if e.variants.is_empty() || e.variants.iter().any(|v| !matches!(v.fields, Fields::Unit)) {
            continue;
        }
        let rename_all = serde_string(&e.attrs, "rename_all");
        let choices = e
            .variants
            .iter()
            .map(|v| {
                serde_string(&v.attrs, "rename").unwrap_or_else(|| {
                    apply_rename_rule(&v.ident.to_string(), rename_all.as_deref())
                })
            })
            .collect();
        out.insert(e.ident.to_string(), choices);
    }
    out
}

/// Reads `#[serde(<key> = "...")]` from an attribute list.
fn serde_string(attrs: &[Attribute], key: &str) -> Option<String> {
    let mut found = None;
    for attr in attrs.iter().filter(|a| a.path().is_ident("serde")) {
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident(key) && meta.input.peek(Token![=]) {
                let value: LitStr = meta.value()?.parse()?;
                found = Some(value.value());
            } else if meta.input.peek(Token![=]) {
                let _: Expr = meta.value()?.parse()?;
            } else if meta.input.peek(syn::token::Paren) {
                meta.parse_nested_meta(|inner| {
                    if inner.input.peek(Token![=]) {
                        let _: Expr = inner.value()?.parse()?;
                    }
                    Ok(())
                })?;
            }
            Ok(())
        });
    }
    found
}

/// Applies a serde `rename_all` rule to a PascalCase variant name.
pub fn apply_rename_rule(variant: &str, rule: Option<&str>) -> String {
    let words = split_pascal(variant);
    let lower: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
    let upper: Vec<String> = words.iter().map(|w| w.to_uppercase()).collect();
    match rule {
        Some("lowercase") => variant.to_lowercase(),
        Some("UPPERCASE") => variant.to_uppercase(),
        Some("snake_case") => lower.join("_"),
        Some("SCREAMING_SNAKE_CASE") => upper.join("_"),
        Some("kebab-case") => lower.join("-"),
        Some("SCREAMING-KEBAB-CASE") => upper.join("-"),
        Some("camelCase") => {
            let mut chars = variant.chars();
            match chars.next() {
                Some(first) => first.to_lowercase().chain(chars).collect(),
                None => String::new(),
            }
        }
        _ => variant.to_string(),
    }
}

fn split_pascal(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in name.chars() {
        if ch.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}
