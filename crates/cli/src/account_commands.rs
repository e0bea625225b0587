use {
    anyhow::Result,
    clap::Subcommand,
    wahub_accounts::{Account, AccountStore, SqliteAccountStore},
    wahub_config::WahubConfig,
};

#[derive(Subcommand)]
pub enum AccountAction {
    /// List persisted accounts without starting the gateway.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_accounts(config: &WahubConfig, action: AccountAction) -> Result<()> {
    match action {
        AccountAction::List { json } => list(config, json).await,
    }
}

async fn list(config: &WahubConfig, json: bool) -> Result<()> {
    std::fs::create_dir_all(config.data_dir())?;
    let store = SqliteAccountStore::connect(&config.database_url()).await?;
    let accounts = store.list_accounts().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&accounts)?);
    } else if accounts.is_empty() {
        println!("No accounts.");
    } else {
        print!("{}", render_table(&accounts));
    }
    Ok(())
}

fn render_table(accounts: &[Account]) -> String {
    let id_width = accounts
        .iter()
        .map(|a| a.id.len())
        .max()
        .unwrap_or(0)
        .max("ID".len());

    let mut out = format!(
        "{:<id_width$}  {:<12}  {:<15}  LAST CONNECTED\n",
        "ID", "STATUS", "PHONE"
    );
    for account in accounts {
        let last = account
            .last_connected
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".into());
        let phone = if account.phone_number.is_empty() {
            "-"
        } else {
            &account.phone_number
        };
        out.push_str(&format!(
            "{:<id_width$}  {:<12}  {:<15}  {}\n",
            account.id,
            account.status.as_str(),
            phone,
            last
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use {super::*, chrono::TimeZone, wahub_accounts::AccountStatus};

    #[test]
    fn table_lists_every_account() {
        let mut paired = Account::new("paired");
        paired.status = AccountStatus::LoggedIn;
        paired.phone_number = "628123456789".into();
        paired.last_connected = chrono::Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).single();
        let fresh = Account::new("fresh");

        let table = render_table(&[paired, fresh]);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].contains("logged_in"));
        assert!(lines[1].contains("628123456789"));
        assert!(lines[1].ends_with("2025-01-02 03:04:05"));
        assert!(lines[2].starts_with("fresh"));
        assert!(lines[2].ends_with('-'));
    }
}
