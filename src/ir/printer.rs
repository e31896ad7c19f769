//! Text format writer. Output parses back into an equal module, except that
//! branch labels are regenerated as `L0`, `L1`, ... in program order.

use std::fmt::{self, Write};

use hashbrown::HashMap;

use super::*;

pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

pub fn write_module(f: &mut fmt::Formatter<'_>, module: &Module) -> fmt::Result {
    for (i, ty) in module.types.iter().enumerate() {
        if i > 0 {
            writeln!(f)?;
        }
        write_type(f, ty, 0)?;
    }
    Ok(())
}

fn indent(level: usize) -> String {
    "  ".repeat(level)
}

fn write_type(f: &mut fmt::Formatter<'_>, ty: &TypeDef, level: usize) -> fmt::Result {
    let pad = indent(level);
    write!(f, "{}{} {}", pad, ty.kind.keyword(), ty.name)?;
    if let Some(base) = &ty.base {
        write!(f, " : {}", base)?;
    }
    if !ty.interfaces.is_empty() {
        let names: Vec<String> = ty.interfaces.iter().map(|i| i.to_string()).collect();
        write!(f, " impl {}", names.join(", "))?;
    }
    writeln!(f, " {{")?;

    let inner = indent(level + 1);
    if !ty.ctor.is_empty() {
        let params: Vec<String> = ty
            .ctor
            .iter()
            .map(|p| {
                let bind = match (&p.alias, p.bound) {
                    (Some(alias), true) => format!("bind({}) ", quote(alias)),
                    (None, true) => "bind ".to_string(),
                    _ => String::new(),
                };
                format!("{}{} {}", bind, p.ty, p.name)
            })
            .collect();
        writeln!(f, "{}ctor({})", inner, params.join(", "))?;
    }
    for field in &ty.fields {
        let prefix = if field.is_static { "static " } else { "" };
        writeln!(f, "{}{}field {} {}", inner, prefix, field.ty, field.name)?;
    }
    for method in &ty.methods {
        write_method(f, method, level + 1)?;
    }
    for nested in &ty.nested {
        write_type(f, nested, level + 1)?;
    }
    writeln!(f, "{}}}", pad)
}

fn write_params(params: &[ParamDef]) -> String {
    let mut out = String::new();
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        for attr in &param.attrs {
            match attr {
                ParamAttr::CallerArgument(name) => {
                    let _ = write!(out, "#arg({}) ", name);
                }
                ParamAttr::CallerField(name) => {
                    let _ = write!(out, "#field({}) ", name);
                }
                ParamAttr::CallerInstance => out.push_str("#this "),
                ParamAttr::CallerMethodName => out.push_str("#caller "),
                ParamAttr::Result => out.push_str("#result "),
            }
        }
        if param.is_out {
            out.push_str("out ");
        } else if param.is_ref {
            out.push_str("ref ");
        }
        let _ = write!(out, "{} {}", param.ty, param.name);
    }
    out
}

fn write_marker(f: &mut fmt::Formatter<'_>, app: &MarkerApplication, pad: &str) -> fmt::Result {
    write!(f, "{}@{}", pad, app.marker)?;
    if !app.args.is_empty() || !app.properties.is_empty() {
        let mut parts: Vec<String> = app.args.iter().map(|a| a.to_string()).collect();
        parts.extend(
            app.properties
                .iter()
                .map(|(name, value)| format!("{} = {}", name, value)),
        );
        write!(f, "({})", parts.join(", "))?;
    }
    writeln!(f)
}

fn write_method(f: &mut fmt::Formatter<'_>, method: &MethodDef, level: usize) -> fmt::Result {
    let pad = indent(level);
    writeln!(f)?;
    for app in &method.markers {
        write_marker(f, app, &pad)?;
    }
    f.write_str(&pad)?;
    match method.target {
        Some(TargetDecl { priority: 0 }) => f.write_str("target ")?,
        Some(TargetDecl { priority }) => write!(f, "target(priority = {}) ", priority)?,
        None => {}
    }
    if method.is_static {
        f.write_str("static ")?;
    }
    write!(
        f,
        "method {} {}({})",
        method.return_type,
        method.name,
        write_params(&method.params)
    )?;
    match &method.body {
        None => writeln!(f, " native"),
        Some(body) => {
            writeln!(f, " {{")?;
            write_body(f, body, method, level + 1)?;
            writeln!(f, "{}}}", pad)
        }
    }
}

fn write_body(f: &mut fmt::Formatter<'_>, body: &Body, method: &MethodDef, level: usize) -> fmt::Result {
    let pad = indent(level);
    let positions = body.positions();

    let mut targets: Vec<InstId> = body.iter().filter_map(|(_, op)| op.branch_target()).collect();
    for region in body.regions() {
        targets.push(region.try_start);
        targets.push(region.handler_start);
        targets.extend(region.try_end);
        targets.extend(region.handler_end);
    }
    targets.sort_by_key(|id| positions.get(id).copied().unwrap_or(usize::MAX));
    targets.dedup();
    let labels: HashMap<InstId, String> = targets
        .into_iter()
        .enumerate()
        .map(|(i, id)| (id, format!("L{}", i)))
        .collect();
    let label = |id: &InstId| labels.get(id).cloned().unwrap_or_else(|| id.to_string());
    let local_name = |id: &LocalId| match body.local(*id).and_then(|l| l.name.clone()) {
        Some(name) => name,
        None => format!("${}", id.index()),
    };

    for (i, local) in body.locals().iter().enumerate() {
        let name = local.name.clone().unwrap_or_else(|| format!("${}", i));
        writeln!(f, "{}local {} {}", pad, local.ty, name)?;
    }

    for (id, op) in body.iter() {
        if let Some(name) = labels.get(&id) {
            writeln!(f, "{}{}:", indent(level.saturating_sub(1)), name)?;
        }
        let text = match op {
            Opcode::LdArg(i) => {
                let name = method
                    .params
                    .get(*i as usize)
                    .map_or_else(|| i.to_string(), |p| p.name.clone());
                format!("ldarg {}", name)
            }
            Opcode::LdLoc(l) | Opcode::StLoc(l) | Opcode::LdLocA(l) => {
                format!("{} {}", op.mnemonic(), local_name(l))
            }
            Opcode::Br(t) | Opcode::BrTrue(t) | Opcode::BrFalse(t) | Opcode::Leave(t) => {
                format!("{} {}", op.mnemonic(), label(t))
            }
            _ => op.to_string(),
        };
        writeln!(f, "{}{}", pad, text)?;
    }

    for region in body.regions() {
        let end = |b: &Option<InstId>| b.as_ref().map_or_else(|| "end".to_string(), &label);
        let kind = match region.kind {
            RegionKind::Catch => "catch",
            RegionKind::Finally => "finally",
        };
        writeln!(
            f,
            "{}.try {} {} {} {} {}",
            pad,
            label(&region.try_start),
            end(&region.try_end),
            kind,
            label(&region.handler_start),
            end(&region.handler_end)
        )?;
    }
    Ok(())
}
