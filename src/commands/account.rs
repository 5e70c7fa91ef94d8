use crate::services::state::AppState;
use tracing::warn;

pub async fn sign_in(state: &AppState, provider: &str, id_token: &str) -> Result<(), String> {
    let (user, profile) = state
        .sign_in(provider, id_token)
        .await
        .map_err(|e| e.to_string())?;
    println!("Signed in as {} <{}>", user.display_name, user.email);
    println!("{}", remaining_line(state.quota.remaining_uploads(Some(&profile))));
    Ok(())
}

pub async fn sign_out(state: &AppState) -> Result<(), String> {
    state.sign_out().await.map_err(|e| e.to_string())?;
    println!("Signed out.");
    Ok(())
}

pub async fn status(state: &AppState) -> Result<(), String> {
    let Some(user) = state.current_user() else {
        println!("Not signed in.");
        return Ok(());
    };
    if let Err(err) = state.verify_user().await {
        warn!(error = %err, "could not confirm session with identity provider");
    }

    let profile = state
        .profile_store()
        .map_err(|e| e.to_string())?
        .get(&user.id)
        .await
        .map_err(|e| e.to_string())?;
    println!("User:     {} <{}>", user.display_name, user.email);
    println!("Uploads:  {}", profile.as_ref().map(|p| p.upload_count).unwrap_or(0));
    println!("{}", remaining_line(state.quota.remaining_uploads(profile.as_ref())));

    let logs = {
        let db = state.db.lock().map_err(|_| "DB lock".to_string())?;
        db.recent_upload_logs(5).map_err(|e| e.to_string())?
    };
    if !logs.is_empty() {
        println!("Recent uploads:");
        for entry in logs {
            println!(
                "  {}  {:<7} {:<8} {}{}",
                entry.created_at,
                entry.kind,
                entry.status,
                entry.file_name,
                entry.message.map(|m| format!(" ({})", m)).unwrap_or_default()
            );
        }
    }
    Ok(())
}

fn remaining_line(remaining: Option<u32>) -> String {
    match remaining {
        None => "Remaining: unlimited".to_string(),
        Some(n) => format!("Remaining: {}", n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paid_accounts_read_unlimited() {
        assert_eq!(remaining_line(None), "Remaining: unlimited");
        assert_eq!(remaining_line(Some(3)), "Remaining: 3");
    }
}
