//! Symbol demangling utilities.
//!
//! Imports are declared by their source-level qualified name
//! (`MethodTable::GetNumInstanceFieldBytes`), but symbol tables carry linkage
//! names. This module recovers the qualified *path* of a linkage name, without
//! parameter types, which is exactly the key imports are looked up by.
//!
//! ## Symbol Mangling
//!
//! - **C++ (Itanium)**: `_ZN11MethodTable24GetNumInstanceFieldBytesEv`
//! - **C++ (MSVC)**: `?GetNumInstanceFieldBytes@MethodTable@@QEAAIXZ`
//! - **Rust**: legacy `_ZN...17h<hash>E` and v0 `_R...`, via `rustc-demangle`
//! - **C**: unmangled
//!
//! Anything this module cannot decode confidently (templates, operators,
//! substitutions) yields `None` and the symbol stays reachable by its raw name.

use rustc_demangle::try_demangle;

/// Qualified path of a linkage name, if it is mangled and decodable
///
/// ```rust
/// use hostlens_core::symbols::demangle::qualified_name;
///
/// assert_eq!(
///     qualified_name("_ZN11MethodTable24GetNumInstanceFieldBytesEv").as_deref(),
///     Some("MethodTable::GetNumInstanceFieldBytes")
/// );
/// assert_eq!(
///     qualified_name("?GetModule@MethodTable@@QEBAPEAVModule@@XZ").as_deref(),
///     Some("MethodTable::GetModule")
/// );
/// assert_eq!(qualified_name("g_pStringClass"), None);
/// ```
pub fn qualified_name(raw: &str) -> Option<String>
{
    if let Some(rest) = raw.strip_prefix("_Z") {
        if let Some(name) = itanium(rest) {
            return Some(name);
        }
    }
    if let Some(rest) = raw.strip_prefix('?') {
        return msvc(rest);
    }
    if raw.starts_with("_R") || raw.starts_with("_ZN") {
        // `{:#}` drops the trailing hash.
        return try_demangle(raw).ok().map(|demangled| format!("{demangled:#}"));
    }
    None
}

fn itanium(mangled: &str) -> Option<String>
{
    let bytes = mangled.as_bytes();
    match bytes.first()? {
        b'N' => itanium_nested(&mangled[1..]),
        // Internal linkage: `_ZL<source-name>`
        b'L' => source_name(&mangled[1..]).map(|(name, _)| name.to_string()),
        b'0'..=b'9' => source_name(mangled).map(|(name, _)| name.to_string()),
        _ => None,
    }
}

fn itanium_nested(mut rest: &str) -> Option<String>
{
    // CV and ref qualifiers of the implicit object parameter.
    rest = rest.trim_start_matches(['r', 'V', 'K']);
    rest = rest.trim_start_matches(['R', 'O']);

    let mut parts: Vec<String> = Vec::new();
    if let Some(after) = rest.strip_prefix("St") {
        parts.push("std".to_string());
        rest = after;
    }

    loop {
        let first = *rest.as_bytes().first()?;
        match first {
            b'E' => break,
            b'0'..=b'9' => {
                let (name, after) = source_name(rest)?;
                // Rust legacy mangling ends with a `17h<16 hex>` hash component.
                if is_rust_hash(name) {
                    return None;
                }
                parts.push(name.to_string());
                rest = after;
            }
            // ABI tag: `B<source-name>`, not part of the path.
            b'B' => {
                let (_, after) = source_name(&rest[1..])?;
                rest = after;
            }
            b'C' => {
                let class = parts.last()?.clone();
                parts.push(class);
                rest = skip_ctor_dtor(rest)?;
            }
            b'D' if matches!(rest.as_bytes().get(1), Some(b'0'..=b'2')) => {
                let class = parts.last()?.clone();
                parts.push(format!("~{class}"));
                rest = &rest[2..];
            }
            // Templates, substitutions, operators, local names.
            _ => return None,
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("::"))
    }
}

fn skip_ctor_dtor(rest: &str) -> Option<&str>
{
    // C1 C2 C3 C4 C5, and inheriting constructors `CI1<type>` are not handled.
    match rest.as_bytes().get(1)? {
        b'1'..=b'5' => Some(&rest[2..]),
        _ => None,
    }
}

fn source_name(rest: &str) -> Option<(&str, &str)>
{
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let len: usize = rest[..digits].parse().ok()?;
    let start = digits;
    let end = start.checked_add(len)?;
    if end > rest.len() || !rest.is_char_boundary(end) {
        return None;
    }
    Some((&rest[start..end], &rest[end..]))
}

fn is_rust_hash(name: &str) -> bool
{
    name.len() == 17 && name.starts_with('h') && name[1..].bytes().all(|b| b.is_ascii_hexdigit())
}

fn msvc(rest: &str) -> Option<String>
{
    // `??0Type@@` constructor, `??1Type@@` destructor; other `??x` are operators.
    let (special, rest) = if let Some(after) = rest.strip_prefix('?') {
        match after.as_bytes().first()? {
            b'0' => (Some(false), &after[1..]),
            b'1' => (Some(true), &after[1..]),
            _ => return None,
        }
    } else {
        (None, rest)
    };
    if rest.starts_with('$') {
        // Template instantiation.
        return None;
    }

    let path = &rest[..rest.find("@@")?];
    let mut parts: Vec<&str> = path.split('@').collect();
    if parts.iter().any(|part| part.is_empty() || part.starts_with('?') || part.starts_with('$')) {
        return None;
    }
    parts.reverse();

    let mut parts: Vec<String> = parts.into_iter().map(str::to_string).collect();
    match special {
        Some(is_dtor) => {
            let class = parts.last()?.clone();
            parts.push(if is_dtor { format!("~{class}") } else { class });
        }
        None => {}
    }
    Some(parts.join("::"))
}
