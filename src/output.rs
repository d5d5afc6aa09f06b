use anyhow::{Context, Result};
use std::{fs, io::Write, path::Path};
use tempfile::NamedTempFile;

/// Directory `path` will land in, created if missing.
pub fn ensure_parent_dir(path: &Path) -> Result<&Path> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    Ok(dir)
}

/// Write bytes next to `path` and rename over it, so readers never see a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = ensure_parent_dir(path)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path)
        .with_context(|| format!("persist {}", path.display()))?;
    Ok(())
}

/// Thousands-separated whole number, e.g. `64,074`.
pub fn thousands(v: f64) -> String {
    let rounded = v.round();
    let neg = rounded < 0.0;
    let digits = format!("{:.0}", rounded.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if neg { format!("-{out}") } else { out }
}

/// `$64,074`
pub fn dollars(v: f64) -> String {
    if v < 0.0 {
        format!("-${}", thousands(-v))
    } else {
        format!("${}", thousands(v))
    }
}

/// `$1,234.57` for prices that need cents.
pub fn dollars_cents(v: f64) -> String {
    if v < 0.0 {
        return format!("-{}", dollars_cents(-v));
    }
    let whole = v.trunc();
    let cents = ((v - whole).abs() * 100.0).round();
    // 99.995 rounds up into the next whole unit
    let (whole, cents) = if cents >= 100.0 {
        (whole + 1.0, 0.0)
    } else {
        (whole, cents)
    };
    format!("{}.{:02.0}", dollars(whole), cents)
}
