use std::io::{BufRead, IsTerminal};

use {anyhow::Result, clap::Subcommand};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Hash a panel password for `[[auth.users]]`.
    HashPassword {
        /// Password to hash. Read from stdin when omitted.
        #[arg(long)]
        password: Option<String>,
    },
}

pub fn handle_auth(action: AuthAction) -> Result<()> {
    match action {
        AuthAction::HashPassword { password } => hash_password(password),
    }
}

fn hash_password(password: Option<String>) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => read_password()?,
    };
    if password.is_empty() {
        anyhow::bail!("password must not be empty");
    }
    let hash = botherd_auth::hash_password(&password)?;
    println!("{hash}");
    Ok(())
}

fn read_password() -> Result<String> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        eprint!("Password: ");
    }
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
