//! Guided form steps: built-in list, JSON loading and listing.

use std::path::Path;

use anyhow::{Context, Result};

use crate::dialog::DialogStep;

/// The built-in registration form.
pub fn default_steps() -> Vec<DialogStep> {
    vec![
        DialogStep { id: "name".into(), prompt: "What is your full name?".into(), spell_back: false },
        DialogStep { id: "age".into(), prompt: "How old are you?".into(), spell_back: false },
        DialogStep { id: "contact".into(), prompt: "Please say your contact number.".into(), spell_back: true },
    ]
}

/// Load steps from a JSON array of `{id, prompt, spell_back?}` objects.
pub fn load_steps(path: &Path) -> Result<Vec<DialogStep>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read form steps: {}", path.display()))?;
    parse_steps(&raw).with_context(|| format!("Invalid form steps in {}", path.display()))
}

fn parse_steps(raw: &str) -> Result<Vec<DialogStep>> {
    let steps: Vec<DialogStep> = serde_json::from_str(raw)?;

    let mut seen = std::collections::HashSet::new();
    for step in &steps {
        if step.id.trim().is_empty() || step.prompt.trim().is_empty() {
            anyhow::bail!("every step needs a non-empty id and prompt");
        }
        if !seen.insert(step.id.as_str()) {
            anyhow::bail!("duplicate step id '{}'", step.id);
        }
    }

    Ok(steps)
}

/// Print the steps of the guided form.
pub fn print_steps(steps: &[DialogStep]) {
    println!("═══════════════════════════════════════════════════════════════════");
    println!("  Guided form steps");
    println!("═══════════════════════════════════════════════════════════════════");
    for (index, step) in steps.iter().enumerate() {
        let spelled = if step.spell_back { "  (read back digit by digit)" } else { "" };
        println!("  {:>2}. {:<12} {}{}", index + 1, step.id, step.prompt, spelled);
    }
    println!();
    println!("Use --form-steps <file.json> to supply your own steps.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_steps() {
        let steps = default_steps();
        assert_eq!(steps.len(), 3);
        assert!(steps.iter().filter(|s| s.spell_back).all(|s| s.id == "contact"));
    }

    #[test]
    fn test_parse_steps() {
        let steps = parse_steps(
            r#"[{"id": "room", "prompt": "Which room are you visiting?"},
                {"id": "phone", "prompt": "Your phone number?", "spell_back": true}]"#,
        )
        .unwrap();
        assert_eq!(steps.len(), 2);
        assert!(!steps[0].spell_back);
        assert!(steps[1].spell_back);
    }

    #[test]
    fn test_parse_steps_rejects_duplicates_and_blanks() {
        assert!(parse_steps(r#"[{"id": "a", "prompt": "x"}, {"id": "a", "prompt": "y"}]"#).is_err());
        assert!(parse_steps(r#"[{"id": " ", "prompt": "x"}]"#).is_err());
        assert!(parse_steps("not json").is_err());
    }
}
