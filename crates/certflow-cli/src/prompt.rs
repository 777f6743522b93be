//! Terminal prompts.

use certflow::{Error, PasswordPrompt, Provisioner, ProvisionerChooser};
use dialoguer::{theme::ColorfulTheme, Password, Select};

/// Asks the user to pick a provisioner.
pub struct SelectProvisioner;

impl ProvisionerChooser for SelectProvisioner {
    fn choose(&self, candidates: &[Provisioner]) -> certflow::Result<usize> {
        let items: Vec<String> = candidates
            .iter()
            .map(|p| format!("{} (kid: {})", p.name, p.kid()))
            .collect();

        Select::with_theme(&ColorfulTheme::default())
            .with_prompt("What provisioner key do you want to use?")
            .items(&items)
            .default(0)
            .interact()
            .map_err(|e| Error::Prompt(e.to_string()))
    }
}

/// Reads a password without echo.
pub struct TerminalPassword;

impl PasswordPrompt for TerminalPassword {
    fn password(&self, message: &str) -> certflow::Result<String> {
        Password::with_theme(&ColorfulTheme::default())
            .with_prompt(message)
            .interact()
            .map_err(|e| Error::Prompt(e.to_string()))
    }
}
