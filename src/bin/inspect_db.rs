use sqlx::Row;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::BTreeMap;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <owner> [database_url]", args[0]);
        eprintln!("Prints every stored message of <owner> with its classifications.");
        std::process::exit(1);
    }

    let owner = &args[1];
    let database_url = args.get(2).map(String::as_str).unwrap_or("sqlite://mailmood.db");
    let pool = SqlitePoolOptions::new()
        .connect(database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    let messages = sqlx::query(
        "SELECT id, provider_id, content, received_at, is_received
         FROM messages
         WHERE owner = ?
         ORDER BY id",
    )
    .bind(owner)
    .fetch_all(&pool)
    .await?;

    if messages.is_empty() {
        println!("No messages stored for '{}'", owner);
        return Ok(());
    }

    // label -> messages whose latest classification carries it
    let mut totals: BTreeMap<String, u32> = BTreeMap::new();

    for row in &messages {
        let id: i64 = row.get("id");
        let provider_id: Option<String> = row.get("provider_id");
        let content: String = row.get("content");
        let received_at: String = row.get("received_at");
        let is_received: bool = row.get("is_received");

        println!(
            "--------------------------------------------------------------------------------"
        );
        println!(
            "#{} [{}] {} ({})",
            id,
            if is_received { "received" } else { "sent" },
            received_at,
            provider_id.as_deref().unwrap_or("-")
        );
        println!("{}", content);

        let classifications = sqlx::query(
            "SELECT label, score, analyzed_at
             FROM classifications
             WHERE message_id = ?
             ORDER BY id",
        )
        .bind(id)
        .fetch_all(&pool)
        .await?;

        if classifications.is_empty() {
            println!("  (not classified)");
        }
        for c in &classifications {
            let label: String = c.get("label");
            let score: f64 = c.get("score");
            let analyzed_at: String = c.get("analyzed_at");
            println!("  {:<8} {:>7.3}  {}", label, score, analyzed_at);
        }

        if let Some(latest) = classifications.last() {
            *totals.entry(latest.get("label")).or_default() += 1;
        }
    }

    println!(
        "--------------------------------------------------------------------------------"
    );
    println!("{} message(s)", messages.len());
    for (label, count) in &totals {
        println!("{:<8} {}", label, count);
    }

    Ok(())
}
