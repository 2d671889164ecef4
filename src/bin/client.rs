//! Interactive line client for a memstash server

use clap::Parser;
use memstash::Client;
use std::io::{self, Write};

#[derive(Parser, Debug)]
#[command(about = "Interactive client for a memstash server")]
struct Args {
    /// Server address
    #[arg(default_value = "127.0.0.1:11211")]
    server: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Connecting to memstash server at {}...", args.server);
    let mut client = Client::connect(&args.server).await?;
    println!("Connected! Type 'help' for available commands or 'quit' to exit.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        match input {
            "" => continue,
            "quit" | "exit" => {
                println!("Goodbye!");
                break;
            }
            "help" => print_help(),
            _ => {
                if let Err(e) = handle_command(&mut client, input).await {
                    println!("Error: {}", e);
                }
            }
        }
    }

    client.close().await?;
    Ok(())
}

async fn handle_command(client: &mut Client, input: &str) -> memstash::Result<()> {
    let (command, rest) = input.split_once(' ').unwrap_or((input, ""));

    match command {
        "set" => match rest.split_once(' ') {
            Some((key, value)) => {
                if client.set(key, value.as_bytes()).await? {
                    println!("STORED");
                } else {
                    println!("NOT-STORED");
                }
            }
            None => println!("Usage: set <key> <value>"),
        },
        "get" => {
            let keys: Vec<&str> = rest.split_whitespace().collect();
            if keys.is_empty() {
                println!("Usage: get <key> [<key> ...]");
                return Ok(());
            }

            let values = client.get(&keys).await?;
            if values.is_empty() {
                println!("(nil)");
            }
            for (key, value) in values {
                println!("{} = {}", key, String::from_utf8_lossy(&value));
            }
        }
        _ => {
            println!(
                "Unknown command: {}. Type 'help' for available commands.",
                command
            );
        }
    }

    Ok(())
}

fn print_help() {
    println!("Available commands:");
    println!("  set <key> <value>       - Store a value");
    println!("  get <key> [<key> ...]   - Fetch one or more values");
    println!("  help                    - Show this help message");
    println!("  quit                    - Exit the client");
}
