use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;
use usbip_core::binding::BindingStore;
use usbip_core::{enumerate, hwdb, resolver};

#[derive(Parser)]
#[clap(name = "usbipd", about = "USB/IP server daemon")]
struct Args {
    #[clap(subcommand)]
    command: Command,
    /// Raise logging from info to debug
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List locally connected USB devices and their bind state
    List,
    /// Mark a device as exportable
    Bind {
        /// Bus ID of the device to bind, as shown by `list` (e.g. "1-3")
        #[arg(short = 'b', long = "bus-id")]
        bus_id: String,
    },
    /// Remove a device's exportable binding
    Unbind {
        /// Bus ID of the device to unbind
        #[arg(short = 'b', long = "bus-id", conflicts_with = "all")]
        bus_id: Option<String>,
        /// Remove every binding
        #[arg(long, conflicts_with = "bus_id")]
        all: bool,
    },
    /// Resolve all bound devices and serve them over TCP/3240 until interrupted
    Start,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(if args.verbose { "debug" } else { "info" }))
        .with_writer(std::io::stderr)
        .init();

    let result = match args.command {
        Command::List => command_list(),
        Command::Bind { bus_id } => command_bind(&bus_id),
        Command::Unbind { bus_id, all } => command_unbind(bus_id.as_deref(), all),
        Command::Start => command_start(),
    };

    if let Err(e) = result {
        eprintln!("{} {e}", "Error:".red());
        std::process::exit(1);
    }
}

fn command_list() -> Result<(), Box<dyn std::error::Error>> {
    let devices = enumerate::enumerate()?;
    let store = BindingStore::open_default()?;

    if devices.is_empty() {
        println!("No USB devices found");
        return Ok(());
    }

    println!("Local USB devices");
    println!("=================");

    for device in &devices {
        let bound = store.contains(device.vendor_id, device.product_id, &device.serial_number);

        println!(
            " - busid {} ({:04x}:{:04x}) [{}]",
            device.busid,
            device.vendor_id,
            device.product_id,
            if bound { "bound".green() } else { "not bound".normal() }
        );

        print!("   ");
        match hwdb::vendor_name(device.vendor_id) {
            Some(vendor) => print!("{vendor}"),
            None => print!("unknown vendor"),
        }
        print!(" : ");
        match hwdb::product_name(device.vendor_id, device.product_id) {
            Some(product) => print!("{product}"),
            None => print!("unknown product"),
        }
        println!();

        if !device.serial_number.is_empty() {
            println!("   serial: {}", device.serial_number);
        }
    }

    Ok(())
}

fn resolve_busid(busid: &str) -> Result<usbip_core::enumerate::LiveDevice, Box<dyn std::error::Error>> {
    let mut devices = enumerate::enumerate()?;
    let position = devices.iter().position(|d| d.busid == busid);
    match position {
        Some(index) => Ok(devices.remove(index)),
        None => Err(format!("no such device: {busid}").into()),
    }
}

fn command_bind(bus_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let device = resolve_busid(bus_id)?;
    let mut store = BindingStore::open_default()?;
    let added = store.add(device.vendor_id, device.product_id, &device.serial_number)?;

    if added {
        println!("Device with bus id {bus_id} bound successfully");
    } else {
        println!("Device with bus id {bus_id} was already bound");
    }

    Ok(())
}

fn command_unbind(bus_id: Option<&str>, all: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = BindingStore::open_default()?;

    if all {
        let count = store.clear()?;
        println!("Removed {count} binding(s)");
        return Ok(());
    }

    let bus_id = bus_id.ok_or("either --bus-id or --all must be given")?;
    let device = resolve_busid(bus_id)?;
    let removed = store.remove(device.vendor_id, device.product_id, &device.serial_number)?;

    if removed {
        println!("Device with bus id {bus_id} unbound successfully");
    } else {
        println!("Device with bus id {bus_id} was not bound");
    }

    Ok(())
}

#[tokio::main]
async fn command_start() -> Result<(), Box<dyn std::error::Error>> {
    let store = BindingStore::open_default()?;
    let table = resolver::resolve(&store)?;

    if table.is_empty() {
        return Err("no bound devices are currently connected".into());
    }

    println!("Serving {} device(s) on 0.0.0.0:3240", table.len());
    usbip_core::acceptor::run_until_ctrl_c(std::sync::Arc::new(table)).await?;
    Ok(())
}
