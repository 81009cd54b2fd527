//! Offset-accurate import scanning.
//!
//! Finds import/export declarations (static and dynamic) in script
//! source and `@import` references in stylesheets, recording exact byte
//! offsets so the rewriter can splice replacements in place. Lexical,
//! not a full parse: comments, string literals, and template literals
//! are skipped so their contents never produce false positives.
//! Dynamic imports whose argument is not a string literal are not
//! reported at all — they cannot be resolved statically.

/// One reference found in a scanned body.
///
/// `start..end` are byte offsets of the specifier text itself (between
/// the quotes). Records live for a single rewrite call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub start: usize,
    pub end: usize,
    pub specifier: String,
    pub dynamic: bool,
    /// For dynamic imports: byte span of the whole `import(...)` call,
    /// including any extra arguments, so a hook can replace the call
    /// wholesale.
    pub call_span: Option<(usize, usize)>,
}

/// Scan script source for import/export declarations.
#[must_use]
pub fn scan_module_source(source: &str) -> Vec<ImportRecord> {
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut records = Vec::new();
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'/' if i + 1 < len && bytes[i + 1] == b'/' => {
                i = skip_line_comment(bytes, i);
            }
            b'/' if i + 1 < len && bytes[i + 1] == b'*' => {
                i = skip_block_comment(bytes, i);
            }
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
            }
            b'`' => {
                i = skip_template(bytes, i);
            }
            b'i' if matches_keyword(bytes, i, b"import") => {
                let kw_start = i;
                i += 6;
                i = scan_import(bytes, kw_start, i, source, &mut records);
            }
            b'e' if matches_keyword(bytes, i, b"export") => {
                i += 6;
                i = scan_export(bytes, i, source, &mut records);
            }
            _ => i += 1,
        }
    }

    records
}

/// After an `import` keyword: dynamic call, side-effect string, or a
/// statement with a `from` clause. Returns the position to resume at.
fn scan_import(
    bytes: &[u8],
    kw_start: usize,
    mut i: usize,
    source: &str,
    records: &mut Vec<ImportRecord>,
) -> usize {
    i = skip_trivia(bytes, i);
    if i >= bytes.len() {
        return i;
    }

    match bytes[i] {
        // import.meta — not an import declaration.
        b'.' => i,
        b'(' => scan_dynamic_call(bytes, kw_start, i, source, records),
        b'"' | b'\'' | b'`' => {
            // Side-effect import.
            if let Some((start, end, after)) = read_literal(bytes, i) {
                records.push(record_at(source, start, end, false, None));
                after
            } else {
                skip_string(bytes, i)
            }
        }
        _ => scan_from_clause(bytes, i, source, records),
    }
}

/// `import(...)` with a literal first argument. The call span covers
/// the whole call so hooks can replace it including extra arguments.
fn scan_dynamic_call(
    bytes: &[u8],
    kw_start: usize,
    open_paren: usize,
    source: &str,
    records: &mut Vec<ImportRecord>,
) -> usize {
    let mut i = skip_trivia(bytes, open_paren + 1);
    if i >= bytes.len() {
        return i;
    }

    let Some((start, end, after)) = read_literal(bytes, i) else {
        // Non-literal argument: leave the call untouched.
        return open_paren + 1;
    };
    i = after;

    // Find the matching close paren, skipping nested calls and strings.
    let mut depth: usize = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                i = skip_line_comment(bytes, i);
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                i = skip_block_comment(bytes, i);
            }
            b'"' | b'\'' => i = skip_string(bytes, i),
            b'`' => i = skip_template(bytes, i),
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth -= 1;
                i += 1;
                if depth == 0 {
                    records.push(record_at(source, start, end, true, Some((kw_start, i))));
                    return i;
                }
            }
            _ => i += 1,
        }
    }

    i
}

/// Scan the rest of an import statement for `from "specifier"`.
fn scan_from_clause(
    bytes: &[u8],
    mut i: usize,
    source: &str,
    records: &mut Vec<ImportRecord>,
) -> usize {
    let limit = (i + 1024).min(bytes.len());

    while i < limit {
        match bytes[i] {
            b';' => return i + 1,
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                i = skip_line_comment(bytes, i);
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                i = skip_block_comment(bytes, i);
            }
            b'f' if matches_keyword(bytes, i, b"from") => {
                let after = skip_trivia(bytes, i + 4);
                if let Some((start, end, resume)) = read_literal(bytes, after) {
                    records.push(record_at(source, start, end, false, None));
                    return resume;
                }
                return after;
            }
            _ => i += 1,
        }
    }

    i
}

/// After an `export` keyword: only `export { .. } from` and
/// `export * [as ns] from` reference another module.
fn scan_export(bytes: &[u8], mut i: usize, source: &str, records: &mut Vec<ImportRecord>) -> usize {
    i = skip_trivia(bytes, i);
    if i >= bytes.len() {
        return i;
    }

    match bytes[i] {
        b'{' => {
            // Skip the export clause braces, then require a from.
            while i < bytes.len() && bytes[i] != b'}' {
                i += 1;
            }
            scan_from_clause(bytes, i, source, records)
        }
        b'*' => scan_from_clause(bytes, i + 1, source, records),
        // Declarations (`export const s = "..."` etc.) reference nothing.
        _ => i,
    }
}

fn record_at(
    source: &str,
    start: usize,
    end: usize,
    dynamic: bool,
    call_span: Option<(usize, usize)>,
) -> ImportRecord {
    ImportRecord {
        start,
        end,
        specifier: source[start..end].to_string(),
        dynamic,
        call_span,
    }
}

/// Read a string literal at `i`, returning the content span and the
/// position just past the closing quote. Template literals qualify only
/// when they carry no interpolation.
fn read_literal(bytes: &[u8], i: usize) -> Option<(usize, usize, usize)> {
    if i >= bytes.len() {
        return None;
    }
    let quote = bytes[i];
    if quote != b'"' && quote != b'\'' && quote != b'`' {
        return None;
    }

    let start = i + 1;
    let mut j = start;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'$' if quote == b'`' && j + 1 < bytes.len() && bytes[j + 1] == b'{' => {
                // Interpolated template: not a static specifier.
                return None;
            }
            c if c == quote => return Some((start, j, j + 1)),
            b'\n' if quote != b'`' => return None,
            _ => j += 1,
        }
    }
    None
}

fn matches_keyword(bytes: &[u8], pos: usize, keyword: &[u8]) -> bool {
    if pos + keyword.len() > bytes.len() || &bytes[pos..pos + keyword.len()] != keyword {
        return false;
    }
    if pos > 0 && is_ident_byte(bytes[pos - 1]) {
        return false;
    }
    if pos + keyword.len() < bytes.len() && is_ident_byte(bytes[pos + keyword.len()]) {
        return false;
    }
    true
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn skip_trivia(bytes: &[u8], mut i: usize) -> usize {
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i + 1 < bytes.len() && bytes[i] == b'/' && bytes[i + 1] == b'/' {
            i = skip_line_comment(bytes, i);
            continue;
        }
        if i + 1 < bytes.len() && bytes[i] == b'/' && bytes[i + 1] == b'*' {
            i = skip_block_comment(bytes, i);
            continue;
        }
        return i;
    }
}

fn skip_line_comment(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i
}

fn skip_block_comment(bytes: &[u8], mut i: usize) -> usize {
    i += 2;
    while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
        i += 1;
    }
    (i + 2).min(bytes.len())
}

fn skip_string(bytes: &[u8], i: usize) -> usize {
    let quote = bytes[i];
    let mut j = i + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            c if c == quote => return j + 1,
            b'\n' => return j + 1,
            _ => j += 1,
        }
    }
    j
}

/// Skip a template literal, tracking `${}` interpolation depth so
/// braces and quotes inside expressions don't end the template early.
fn skip_template(bytes: &[u8], i: usize) -> usize {
    let mut j = i + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'`' => return j + 1,
            b'$' if j + 1 < bytes.len() && bytes[j + 1] == b'{' => {
                j = skip_interpolation(bytes, j + 2);
            }
            _ => j += 1,
        }
    }
    j
}

fn skip_interpolation(bytes: &[u8], mut j: usize) -> usize {
    let mut depth: usize = 1;
    while j < bytes.len() {
        match bytes[j] {
            b'{' => {
                depth += 1;
                j += 1;
            }
            b'}' => {
                depth -= 1;
                j += 1;
                if depth == 0 {
                    return j;
                }
            }
            b'"' | b'\'' => j = skip_string(bytes, j),
            b'`' => j = skip_template(bytes, j),
            _ => j += 1,
        }
    }
    j
}

/// Scan stylesheet source for `@import` references.
///
/// Handles `@import "x"`, `@import 'x'`, `@import url(x)`, and
/// `@import url("x")`; comments are skipped.
#[must_use]
pub fn scan_style_references(source: &str) -> Vec<ImportRecord> {
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut records = Vec::new();
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'/' if i + 1 < len && bytes[i + 1] == b'*' => {
                i = skip_block_comment(bytes, i);
            }
            b'@' if bytes[i..].starts_with(b"@import") => {
                i = skip_trivia(bytes, i + 7);
                if i >= len {
                    break;
                }
                if bytes[i] == b'"' || bytes[i] == b'\'' {
                    if let Some((start, end, after)) = read_literal(bytes, i) {
                        records.push(record_at(source, start, end, false, None));
                        i = after;
                        continue;
                    }
                } else if bytes[i..].starts_with(b"url(") {
                    i = skip_trivia(bytes, i + 4);
                    if i < len && (bytes[i] == b'"' || bytes[i] == b'\'') {
                        if let Some((start, end, after)) = read_literal(bytes, i) {
                            records.push(record_at(source, start, end, false, None));
                            i = after;
                            continue;
                        }
                    } else {
                        let start = i;
                        while i < len && bytes[i] != b')' && !bytes[i].is_ascii_whitespace() {
                            i += 1;
                        }
                        if i > start {
                            records.push(record_at(source, start, i, false, None));
                        }
                        continue;
                    }
                }
            }
            _ => i += 1,
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_import_offsets() {
        let source = r#"import { a } from "./dep";"#;
        let records = scan_module_source(source);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].specifier, "./dep");
        assert_eq!(&source[records[0].start..records[0].end], "./dep");
        assert!(!records[0].dynamic);
    }

    #[test]
    fn test_side_effect_and_star_imports() {
        let source = "import './poly';\nimport * as ns from 'pkg';";
        let records = scan_module_source(source);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].specifier, "./poly");
        assert_eq!(records[1].specifier, "pkg");
    }

    #[test]
    fn test_export_from_variants() {
        let source = "export { a } from './a';\nexport * from './b';\nexport const s = 'from';";
        let records = scan_module_source(source);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].specifier, "./a");
        assert_eq!(records[1].specifier, "./b");
    }

    #[test]
    fn test_dynamic_import_call_span() {
        let source = "const m = await import(\"./lazy\", { assert: {} });";
        let records = scan_module_source(source);
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert!(rec.dynamic);
        assert_eq!(rec.specifier, "./lazy");
        let (cs, ce) = rec.call_span.unwrap();
        assert_eq!(&source[cs..ce], "import(\"./lazy\", { assert: {} })");
    }

    #[test]
    fn test_dynamic_non_literal_skipped() {
        let source = "import(moduleName); import('./real');";
        let records = scan_module_source(source);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].specifier, "./real");
    }

    #[test]
    fn test_import_meta_is_not_an_import() {
        let source = "if (import.meta.env) { import('./x'); }";
        let records = scan_module_source(source);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].specifier, "./x");
    }

    #[test]
    fn test_comments_are_skipped() {
        let source = "// import a from './no'\n/* import b from './nope' */\nimport c from './yes';";
        let records = scan_module_source(source);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].specifier, "./yes");
    }

    #[test]
    fn test_strings_are_skipped() {
        let source = "const s = \"import x from './fake'\";\nimport y from './real';";
        let records = scan_module_source(source);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].specifier, "./real");
    }

    #[test]
    fn test_template_literals_are_skipped() {
        let source = "const t = `import a from './fake' ${'x' + `no`}`;\nimport b from './real';";
        let records = scan_module_source(source);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].specifier, "./real");
    }

    #[test]
    fn test_interpolated_template_argument_skipped() {
        let source = "import(`./pages/${name}`);";
        let records = scan_module_source(source);
        assert!(records.is_empty());
    }

    #[test]
    fn test_multiple_imports_keep_source_order() {
        let source = "import a from './a';\nimport b from 'b';\nconst c = import('./c');";
        let records = scan_module_source(source);
        let specs: Vec<&str> = records.iter().map(|r| r.specifier.as_str()).collect();
        assert_eq!(specs, vec!["./a", "b", "./c"]);
        assert!(records.windows(2).all(|w| w[0].start < w[1].start));
    }

    #[test]
    fn test_style_import_quoted() {
        let source = "@import \"./base.css\";\nbody { color: red; }";
        let records = scan_style_references(source);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].specifier, "./base.css");
        assert_eq!(&source[records[0].start..records[0].end], "./base.css");
    }

    #[test]
    fn test_style_import_url_forms() {
        let source = "@import url(theme.css);\n@import url(\"other.css\");";
        let records = scan_style_references(source);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].specifier, "theme.css");
        assert_eq!(records[1].specifier, "other.css");
    }

    #[test]
    fn test_style_comment_skipped() {
        let source = "/* @import \"./no.css\"; */\n@import \"./yes.css\";";
        let records = scan_style_references(source);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].specifier, "./yes.css");
    }
}
