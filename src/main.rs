use std::io::{self, BufRead, Write};
use std::path::Path;

use log::warn;

use arbordb::engine::Database;
use arbordb::error::DbResult;
use arbordb::query::{Cond, Query};
use arbordb::records::Record;
use arbordb::storage::pager::OpenMode;

fn print_record(rec: &Record) {
    println!("{} {} {:.2} {} {}", rec.id, rec.year, rec.amount, rec.name, rec.kind);
}

fn parse_record(args: &[&str]) -> Option<Record> {
    if args.len() != 5 {
        return None;
    }
    Some(Record {
        id: args[0].parse().ok()?,
        year: args[1].parse().ok()?,
        amount: args[2].parse().ok()?,
        name: args[3].to_string(),
        kind: args[4].to_string(),
    })
}

fn run_command(db: &mut Database, cmd: &str, args: &[&str]) -> DbResult<()> {
    match cmd {
        "load" if args.len() == 1 => {
            let n = db.load_csv(Path::new(args[0]))?;
            println!("loaded {} records", n);
        }
        "insert" => match parse_record(args) {
            Some(rec) => {
                db.insert(&rec)?;
                println!("ok");
            }
            None => println!("usage: insert <id> <year> <amount> <name> <kind>"),
        },
        "find" if args.len() == 1 => {
            let id = args[0].parse().unwrap_or(0);
            match db.find(id)? {
                Some(rec) => print_record(&rec),
                None => println!("not found"),
            }
        }
        "update" => match parse_record(args) {
            Some(rec) => {
                if db.update(&rec)? {
                    println!("ok");
                } else {
                    println!("not found");
                }
            }
            None => println!("usage: update <id> <year> <amount> <name> <kind>"),
        },
        "delete" if args.len() == 1 => {
            let id = args[0].parse().unwrap_or(0);
            if db.remove(id)? {
                println!("ok");
            } else {
                println!("not found");
            }
        }
        "query" => {
            let mut query = Query::new();
            for arg in args {
                match arg.split_once('=') {
                    Some((field, value)) => query = query.with(Cond::parse(field, value)?),
                    None => {
                        println!("usage: query <field>=<value> ...");
                        return Ok(());
                    }
                }
            }
            let hits = db.select(&query)?;
            if hits.is_empty() {
                println!("no matches");
            }
            for rec in &hits {
                print_record(rec);
            }
        }
        "scan" => {
            for (_, rec) in db.records.scan()? {
                print_record(&rec);
            }
        }
        _ => println!("commands: load insert find update delete query scan quit"),
    }
    Ok(())
}

fn main() -> DbResult<()> {
    env_logger::init();

    let argv: Vec<String> = std::env::args().collect();
    if argv.len() != 3 {
        eprintln!("usage: {} <data-file> <index-file>", argv[0]);
        std::process::exit(2);
    }

    let mut db = Database::open(
        Path::new(&argv[1]),
        Path::new(&argv[2]),
        OpenMode::ReadWrite,
    )?;

    let stdin = io::stdin();
    print!("> ");
    io::stdout().flush()?;

    for line in stdin.lock().lines() {
        let line = line?;
        let parts: Vec<&str> = line.split_whitespace().collect();

        if let Some((&cmd, args)) = parts.split_first() {
            if cmd == "quit" || cmd == "exit" {
                break;
            }
            if let Err(e) = run_command(&mut db, cmd, args) {
                warn!("command failed: {}", e);
                println!("error: {}", e);
            }
        }

        print!("> ");
        io::stdout().flush()?;
    }

    db.close()
}
