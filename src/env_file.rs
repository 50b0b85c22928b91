//! Minimal `.env` support. Values already present in the process environment win.

use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct LoadedEnvFile {
    pub path: PathBuf,
    /// Given with `--env-file` rather than picked up from the working directory.
    pub explicit: bool,
}

/// Loads `explicit` when given (it must exist), else `./.env` if present.
pub fn load(explicit: Option<&Path>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        apply_file(path)?;
        return Ok(Some(LoadedEnvFile {
            path: path.to_path_buf(),
            explicit: true,
        }));
    }

    let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
    let default_path = cwd.join(".env");
    if !default_path.is_file() {
        return Ok(None);
    }
    apply_file(&default_path)?;
    Ok(Some(LoadedEnvFile {
        path: default_path,
        explicit: false,
    }))
}

fn apply_file(path: &Path) -> Result<(), String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    for (key, value) in parse(&text).map_err(|e| format!("{}:{}", path.display(), e))? {
        if std::env::var_os(&key).is_none() {
            // Mutating the environment is unsafe once other threads exist; this runs first thing in main.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

/// Assignments in file order; errors carry the 1-based line number.
pub fn parse(text: &str) -> Result<Vec<(String, String)>, String> {
    let mut out = Vec::new();
    for (index, line) in text.lines().enumerate() {
        match parse_assignment(line) {
            Ok(Some(pair)) => out.push(pair),
            Ok(None) => {}
            Err(e) => return Err(format!("{}: {}", index + 1, e)),
        }
    }
    Ok(out)
}

fn parse_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let body = trimmed
        .strip_prefix("export ")
        .map(str::trim_start)
        .unwrap_or(trimmed);

    let (key, raw_value) = body
        .split_once('=')
        .ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.chars().any(char::is_whitespace) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }
    Ok(Some((key.to_string(), parse_value(raw_value)?)))
}

fn parse_value(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    match trimmed.chars().next() {
        Some(q @ ('"' | '\'')) => parse_quoted(&trimmed[1..], q),
        Some(_) => Ok(trimmed
            .split('#')
            .next()
            .unwrap_or_default()
            .trim_end()
            .to_string()),
        None => Ok(String::new()),
    }
}

/// Escapes are only honoured inside double quotes.
fn parse_quoted(input: &str, quote: char) -> Result<String, String> {
    let mut result = String::new();
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch == quote {
            let rest = chars.as_str().trim();
            if rest.is_empty() || rest.starts_with('#') {
                return Ok(result);
            }
            return Err("unexpected characters after closing quote".to_string());
        }
        if ch == '\\' && quote == '"' {
            let escaped = chars
                .next()
                .ok_or_else(|| "unterminated escape sequence in double-quoted value".to_string())?;
            result.push(match escaped {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                other => other,
            });
            continue;
        }
        result.push(ch);
    }
    Err("unterminated quoted value".to_string())
}
