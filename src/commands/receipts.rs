use std::io::{BufRead, Write};

use crate::models::ExpenseRecord;
use crate::services::render::{display_total, render_card, Carousel};
use crate::services::state::AppState;
use crate::utils::format_money;

async fn load_all(state: &AppState) -> Result<Vec<ExpenseRecord>, String> {
    let user = state.require_user().map_err(|e| e.to_string())?;
    state
        .receipt_store()
        .map_err(|e| e.to_string())?
        .list(&user.id)
        .await
        .map_err(|e| e.to_string())
}

async fn load_one(state: &AppState, id: &str) -> Result<ExpenseRecord, String> {
    let user = state.require_user().map_err(|e| e.to_string())?;
    state
        .receipt_store()
        .map_err(|e| e.to_string())?
        .get(id, &user.id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Receipt {} not found", id))
}

pub async fn list_receipts(state: &AppState) -> Result<(), String> {
    let records = load_all(state).await?;
    if records.is_empty() {
        println!("No receipts yet.");
        return Ok(());
    }
    for record in &records {
        let expense = &record.expense;
        println!(
            "{}  {:<10}  {:<24}  {:>12}  [{}]",
            record.id,
            expense.date.as_deref().unwrap_or("-"),
            expense.vendor_name.as_deref().unwrap_or("Unknown vendor"),
            format_money(&expense.currency, display_total(expense)),
            expense.category.as_str()
        );
    }
    Ok(())
}

pub async fn show_receipt(state: &AppState, id: &str) -> Result<(), String> {
    let record = load_one(state, id).await?;
    println!("{}", render_card(&record));
    Ok(())
}

pub async fn delete_receipt(state: &AppState, id: &str, yes: bool) -> Result<(), String> {
    let user = state.require_user().map_err(|e| e.to_string())?;
    if !yes && !confirm(&format!("Delete receipt {}? [y/N] ", id))? {
        println!("Cancelled.");
        return Ok(());
    }
    let removed = state
        .receipt_store()
        .map_err(|e| e.to_string())?
        .delete(id, &user.id)
        .await
        .map_err(|e| e.to_string())?;
    if !removed {
        return Err(format!("Receipt {} not found", id));
    }
    println!("Deleted {}", id);
    Ok(())
}

/// Pages through the user's receipts one card at a time.
pub async fn browse_receipts(state: &AppState) -> Result<(), String> {
    let records = load_all(state).await?;
    let Some(mut carousel) = Carousel::new(records.len()) else {
        println!("No receipts yet.");
        return Ok(());
    };

    let stdin = std::io::stdin();
    loop {
        let record = &records[carousel.index()];
        println!("{}", render_card(record));
        print!(
            "[{}/{}] n: next, p: previous, <number>: jump, q: quit > ",
            carousel.index() + 1,
            carousel.len()
        );
        std::io::stdout().flush().map_err(|e| e.to_string())?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).map_err(|e| e.to_string())? == 0 {
            break;
        }
        match line.trim() {
            "q" | "quit" => break,
            "n" | "" => {
                carousel.next();
            }
            "p" => {
                carousel.prev();
            }
            other => match other.parse::<usize>() {
                Ok(n) if n >= 1 => {
                    carousel.go_to(n - 1);
                }
                _ => println!("Unknown input '{}'", other),
            },
        }
    }
    Ok(())
}

pub async fn open_receipt(state: &AppState, id: &str) -> Result<(), String> {
    let record = load_one(state, id).await?;
    let url = record
        .expense
        .image_url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| format!("Receipt {} has no document link", id))?;
    open::that(&url).map_err(|e| e.to_string())
}

fn confirm(prompt: &str) -> Result<bool, String> {
    print!("{}", prompt);
    std::io::stdout().flush().map_err(|e| e.to_string())?;
    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .map_err(|e| e.to_string())?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewExpense;
    use crate::services::state::tests::{alice_session, local_state};

    #[test]
    fn only_explicit_yes_confirms() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("nope"));
    }

    #[tokio::test]
    async fn delete_with_yes_skips_prompt() {
        let (_dir, state) = local_state();
        state.adopt_session(alice_session()).await.unwrap();
        let record = state
            .receipt_store()
            .unwrap()
            .insert(NewExpense {
                user_id: "alice".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        delete_receipt(&state, &record.id, true).await.unwrap();
        assert!(delete_receipt(&state, &record.id, true).await.is_err());
    }

    #[tokio::test]
    async fn listing_requires_sign_in() {
        let (_dir, state) = local_state();
        assert_eq!(
            list_receipts(&state).await.unwrap_err(),
            crate::error::UploadError::NotSignedIn.to_string()
        );
    }
}
