use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::schema::{Look, ParamOverride};

/// Parse a look file, patch it with `--set` overrides, then validate the result.
pub fn load_look_with_overrides(path: &Path, overrides: &[ParamOverride]) -> Result<Look> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read look file {}", path.display()))?;
    let mut look = parse_look(&contents)
        .map_err(|error| anyhow!("failed to parse yaml in {}: {error}", path.display()))?;
    apply_overrides(&mut look, overrides)?;
    look.validate()
        .with_context(|| format!("invalid look file {}", path.display()))?;
    Ok(look)
}

/// Defaults patched with overrides, for runs without a look file.
pub fn default_look_with_overrides(overrides: &[ParamOverride]) -> Result<Look> {
    let mut look = Look::default();
    apply_overrides(&mut look, overrides)?;
    look.validate()?;
    Ok(look)
}

fn parse_look(contents: &str) -> Result<Look> {
    // An empty document means "all defaults".
    if contents.trim().is_empty() {
        return Ok(Look::default());
    }
    serde_yaml::from_str(contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        anyhow!("{location}: {error}")
    })
}

fn apply_overrides(look: &mut Look, overrides: &[ParamOverride]) -> Result<()> {
    for item in overrides {
        look.params.apply_override(&item.name, &item.value)?;
    }
    Ok(())
}
