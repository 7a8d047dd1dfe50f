use std::path::PathBuf;

use clap::Parser;
use log::info;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::LocalSet;

use empdb::db::{Db, DbHolder};
use empdb::{server, Error};

#[derive(Parser, Debug)]
#[command(about = "Employee record database server")]
struct Args {
    /// Path to the database file
    #[arg(short, long)]
    file: PathBuf,

    /// Create the database file instead of opening an existing one
    #[arg(short = 'n', long)]
    new: bool,

    /// Serve the database on this port; omit it for batch mode
    #[arg(short, long)]
    port: Option<u16>,

    /// Batch mode: append one record described by "Name-Address-Hours"
    #[arg(short, long, value_name = "ADDSTR")]
    add: Option<String>,

    /// Batch mode: print every record
    #[arg(short, long)]
    list: bool,

    /// Batch mode: remove the last record
    #[arg(short, long)]
    remove: bool,
}

fn main() -> Result<(), Error> {
    env_logger::init();
    let args = Args::parse();

    let mut holder = if args.new {
        DbHolder::create(&args.file)?
    } else {
        DbHolder::open(&args.file)?
    };

    match args.port {
        Some(port) => serve(holder.db(), port)?,
        None => batch(&holder.db(), &args)?,
    }

    holder.persist()?;
    info!("database saved");

    Ok(())
}

fn serve(db: Db, port: u16) -> Result<(), Error> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    // Sessions are local tasks on the one serving thread.
    let local = LocalSet::new();
    local.block_on(&rt, async move {
        let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
        info!("listening on port {}", port);

        server::run(listener, db, server::MAX_CLIENTS, signal::ctrl_c()).await;

        Ok(())
    })
}

fn batch(db: &Db, args: &Args) -> Result<(), Error> {
    if let Some(addstr) = &args.add {
        db.add(addstr.as_bytes())?;
    }
    if args.remove {
        db.remove_last()?;
    }
    if args.list {
        let records = db.records();
        if records.is_empty() {
            println!("no employees to list");
        }
        for (i, employee) in records.iter().enumerate() {
            println!("Employee #{}:", i + 1);
            println!("\tName: {}", employee.name());
            println!("\tAddress: {}", employee.address());
            println!("\tHours: {}", employee.hours());
        }
    }

    Ok(())
}
