use crate::cli::CLI;
use crate::database::sqlite::SqliteDatabase;
use crate::errors::{AppError, Result};
use crate::services::user_service::UserService;
use colored::Colorize;
use std::sync::Arc;

const DEFAULT_PENDING_LIMIT: i64 = 20;

pub async fn handle_promote_admin_command(db: Arc<SqliteDatabase>, args: &[String]) -> Result<()> {
    let Some(email) = args.first() else {
        println!("{}", "Error: Missing email".red().bold());
        println!("Usage: promote-admin <email>");
        return Ok(());
    };
    let email = email.trim().to_lowercase();

    if !CLI::confirm_action(&format!("Grant admin role to {}?", email))? {
        println!("{}", "Promotion cancelled.".yellow());
        return Ok(());
    }

    let user = UserService::new(db).promote_to_admin(&email).await?;
    CLI::print_success(&format!("{} ({}) is now an admin", user.email, user.id));
    Ok(())
}

pub async fn handle_stats_command(db: Arc<SqliteDatabase>) -> Result<()> {
    let stats = db.kyc_statistics().await?;
    let users = db.count_users(None).await?;
    let anchored = db.count_blockchain_transactions().await?;

    println!("\n{}", "📊 KYC Statistics".cyan().bold());
    println!("{}", "─".repeat(40).blue());
    println!("Users:                 {}", users.to_string().yellow());
    println!("Submissions:           {}", stats.total.to_string().yellow());
    println!("  Pending:             {}", stats.pending.to_string().yellow());
    println!("  Approved:            {}", stats.approved.to_string().green());
    println!("  Rejected:            {}", stats.rejected.to_string().red());
    println!("Approval rate:         {:.1}%", stats.approval_rate);
    println!("Chain transactions:    {}", anchored.to_string().yellow());
    Ok(())
}

pub async fn handle_pending_command(db: Arc<SqliteDatabase>, args: &[String]) -> Result<()> {
    let limit = match args.first() {
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| AppError::validation(format!("Invalid limit: {}", raw)))?
            .clamp(1, 200),
        None => DEFAULT_PENDING_LIMIT,
    };

    let pending = db.list_pending_kyc_submissions(limit).await?;
    if pending.is_empty() {
        println!("{}", "No submissions awaiting review.".yellow());
        return Ok(());
    }

    println!("\n{}", "🕒 Pending Submissions:".cyan().bold());
    for (i, submission) in pending.iter().enumerate() {
        println!(
            "{}. {} {}",
            i + 1,
            submission.id.to_string().green().bold(),
            submission.personal_info.full_name
        );
        println!("   User: {}", submission.user_id);
        println!("   Submitted: {}", submission.submitted_at.format("%Y-%m-%d %H:%M:%S UTC"));
        println!("   Attempts: {}", submission.verification_attempts);
    }
    Ok(())
}

pub async fn handle_cleanup_tokens_command(db: Arc<SqliteDatabase>) -> Result<()> {
    let removed = db.cleanup_expired_tokens().await?;
    CLI::print_info(&format!("Removed {} expired session token(s)", removed));
    Ok(())
}
