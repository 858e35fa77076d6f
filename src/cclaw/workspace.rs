//! System prompt assembly.
//!
//! Folds the workspace location, tool hints, and an optional `IDENTITY.md`
//! at the workspace root into the system prompt handed to the provider.

use std::fs;
use std::path::Path;

/// Assemble the system prompt for a workspace.
pub fn system_prompt(workspace: &Path) -> String {
    let mut prompt = String::from(
        "You are cclaw, a helpful assistant with access to local tools. \
         Use the provided tools when a request needs shell access, file \
         access, or long-term memory; otherwise answer directly.",
    );

    prompt.push_str(&format!(
        "\n\nYour workspace directory is: {}",
        workspace.display()
    ));

    match fs::read_to_string(workspace.join("IDENTITY.md")) {
        Ok(identity) => {
            let identity = identity.trim();
            if !identity.is_empty() {
                prompt.push_str("\n\n");
                prompt.push_str(identity);
            }
        }
        Err(_) => {}
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_file_is_folded_in() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("IDENTITY.md"), "Respond in haiku.\n").unwrap();
        let prompt = system_prompt(dir.path());
        assert!(prompt.contains("Respond in haiku."));
        assert!(prompt.contains(&dir.path().display().to_string()));
    }

    #[test]
    fn missing_identity_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = system_prompt(dir.path());
        assert!(prompt.contains("cclaw"));
    }
}
