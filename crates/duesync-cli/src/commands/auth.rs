//! Calendar account connection flow.
//!
//! `connect` walks the OAuth consent flow in the terminal: it prints (and
//! opens) the consent URL, then expects the `code` and `state` query
//! values from the redirect to be pasted back.

use std::error::Error;
use std::io::{self, BufRead, Write};

use clap::Subcommand;
use duesync_core::calendar::oauth::OAuthState;
use duesync_core::AccountRole;

use crate::common::{AppContext, Pair};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Connect a Google account for one role
    Connect {
        /// Which calendar to connect (guardian or student)
        role: String,
        /// Print the consent URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },
    /// Remove one role's stored credential
    Disconnect {
        /// Which calendar to disconnect (guardian or student)
        role: String,
    },
    /// Show connection state for both roles
    Status,
}

pub async fn run(pair: Pair, action: AuthAction) -> Result<(), Box<dyn Error>> {
    let ctx = AppContext::init()?;
    match action {
        AuthAction::Connect { role, no_browser } => {
            connect(&ctx, pair, parse_role(&role)?, no_browser).await
        }
        AuthAction::Disconnect { role } => {
            let role = parse_role(&role)?;
            ctx.vault.revoke(pair.owner_id, pair.student_id, role)?;
            println!("{role} disconnected");
            Ok(())
        }
        AuthAction::Status => {
            let status = ctx.vault.connection_status(pair.owner_id, pair.student_id)?;
            println!(
                "guardian: {}",
                if status.guardian_connected {
                    "connected"
                } else {
                    "not connected"
                }
            );
            println!(
                "student:  {}",
                if status.student_connected {
                    "connected"
                } else {
                    "not connected"
                }
            );
            Ok(())
        }
    }
}

async fn connect(
    ctx: &AppContext,
    pair: Pair,
    role: AccountRole,
    no_browser: bool,
) -> Result<(), Box<dyn Error>> {
    let state = OAuthState::issue(pair.owner_id, pair.student_id, role);
    let issued = state.encode();
    let url = ctx.oauth.authorization_url(&issued)?;

    if no_browser || open::that(&url).is_err() {
        println!("Open this URL to grant calendar access:\n\n{url}\n");
    } else {
        println!("Opened the consent page in your browser.");
    }

    let code = prompt("Paste the 'code' value from the redirect: ")?;
    let callback_state = prompt("Paste the 'state' value from the redirect: ")?;
    OAuthState::verify(&issued, &callback_state)?;

    let http = reqwest::Client::new();
    let tokens = ctx.oauth.exchange_code(&http, code.trim()).await?;
    let email = ctx.oauth.fetch_user_email(&http, &tokens.access_token).await?;
    let refresh = tokens
        .refresh_token
        .ok_or("Google did not return a refresh token; remove the app's access at myaccount.google.com and retry")?;
    ctx.vault.store(
        pair.owner_id,
        pair.student_id,
        role,
        &tokens.access_token,
        &refresh,
        tokens.expires_at,
        &email,
        None,
    )?;
    println!("{role} connected as {email}");
    Ok(())
}

fn parse_role(raw: &str) -> Result<AccountRole, Box<dyn Error>> {
    AccountRole::from_str(raw).ok_or_else(|| format!("unknown role '{raw}' (guardian|student)").into())
}

fn prompt(label: &str) -> Result<String, Box<dyn Error>> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
