use clap::Parser;

use empdb::{Client, Error, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(about = "Remote client for the employee record database")]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Append one record described by "Name-Address-Hours"
    #[arg(short, long, value_name = "ADDSTR")]
    add: Option<String>,

    /// Print every record
    #[arg(short, long)]
    list: bool,

    /// Remove the last record
    #[arg(short, long)]
    remove: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    env_logger::init();
    let args = Args::parse();

    let actions =
        usize::from(args.add.is_some()) + usize::from(args.list) + usize::from(args.remove);
    if actions != 1 {
        return Err("exactly one of --add, --list or --remove is required".into());
    }

    let mut client = Client::connect((args.host.as_str(), args.port)).await?;
    client.hello().await?;

    if let Some(addstr) = &args.add {
        client.add(addstr).await?;
        println!("employee added");
    } else if args.list {
        let records = client.list().await?;
        println!("--- Employee List ({} records) ---", records.len());
        for (i, employee) in records.iter().enumerate() {
            println!("Employee #{}:", i + 1);
            println!("\tName: {}", employee.name());
            println!("\tAddress: {}", employee.address());
            println!("\tHours: {}", employee.hours());
        }
    } else if args.remove {
        client.remove_last().await?;
        println!("employee removed");
    }

    Ok(())
}
