use clap::{Arg, ArgAction, ArgMatches, Command};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::{env, process};

use cvsproto::client::{Client, CvsRoot, UpdateOptions};
use cvsproto::config::{Config, Side};
use cvsproto::logging::init_tracing;
use cvsproto::server;
use cvsproto::sync::mode;

///////////////////////
// Utility functions //
///////////////////////

fn files_arg() -> Arg {
	Arg::new("files").action(ArgAction::Append).num_args(0..)
}

fn strings(matches: &ArgMatches, id: &str) -> Vec<String> {
	matches.get_many::<String>(id).map(|v| v.cloned().collect()).unwrap_or_default()
}

fn load_config(matches: &ArgMatches, side: Side) -> Result<Config, Box<dyn Error>> {
	let mut config = match matches.get_one::<String>("config") {
		Some(path) => Config::load(path)?,
		None => Config::default(),
	};
	config.apply_env(side);
	if let Some(level) = matches.get_one::<u32>("gzip") {
		config.compression.client_level = *level;
	}
	if let Some(prefix) = matches.get_one::<String>("trace") {
		config.trace.log_prefix = Some(PathBuf::from(prefix));
	}
	config.validate()?;
	Ok(config)
}

/// Root from `-d`, `$CVSROOT` or the working copy's `CVS/Root`
fn cvs_root(matches: &ArgMatches) -> Result<CvsRoot, Box<dyn Error>> {
	let text = match matches.get_one::<String>("root") {
		Some(root) => root.clone(),
		None => match env::var("CVSROOT") {
			Ok(root) if !root.is_empty() => root,
			_ => std::fs::read_to_string("CVS/Root")
				.map(|s| s.trim().to_string())
				.map_err(|_| "No CVSROOT specified!  Please use the `-d' option or set the CVSROOT environment variable.")?,
		},
	};
	Ok(CvsRoot::parse(&text)?)
}

async fn run_client(config: Config, matches: &ArgMatches) -> Result<bool, Box<dyn Error>> {
	let root = cvs_root(matches)?;
	let (name, sub) = matches.subcommand().ok_or("no command given")?;
	let program = config.server.program_name.clone();
	let config = Arc::new(config);
	let mut client = Client::connect(config, root, env::current_dir()?).await?;

	let files = strings(sub, "files");
	let result = match name {
		"checkout" => client.checkout(&strings(sub, "modules"), false).await,
		"export" => client.checkout(&strings(sub, "modules"), true).await,
		"update" => {
			let options = UpdateOptions { build_dirs: sub.get_flag("build-dirs"), prune: sub.get_flag("prune") };
			client.update(&files, options).await
		}
		"commit" => {
			let message = sub.get_one::<String>("message").map(|s| s.as_str()).unwrap_or("");
			client.commit(&files, message).await
		}
		"add" => client.add(&files).await,
		"remove" => client.remove(&files).await,
		"status" => client.status(&files).await,
		"version" => client.version().await,
		other => return Err(format!("unknown command `{}'", other).into()),
	};
	let conflicts = client.conflicts();
	client.close().await;

	match result {
		Ok(()) => Ok(conflicts == 0),
		Err(e) => {
			eprintln!("{} [{} aborted]: {}", program, name, e);
			Ok(false)
		}
	}
}

fn main() -> Result<(), Box<dyn Error>> {
	// before the runtime starts its worker threads
	mode::init_umask();
	tokio::runtime::Runtime::new()?.block_on(run())
}

async fn run() -> Result<(), Box<dyn Error>> {
	let matches = Command::new("cvsproto")
		.version(env!("CARGO_PKG_VERSION"))
		.about("CVS client/server protocol engine")
		.subcommand_required(true)
		.arg(Arg::new("config").long("config").value_name("FILE").help("Config file (TOML or JSON5)"))
		.arg(Arg::new("root").short('d').value_name("CVSROOT").help("Repository root"))
		.arg(
			Arg::new("gzip")
				.short('z')
				.value_name("LEVEL")
				.value_parser(clap::value_parser!(u32).range(0..=9))
				.help("Compression level"),
		)
		.arg(Arg::new("trace").long("trace").value_name("PREFIX").help("Log raw protocol traffic"))
		.subcommand(Command::new("server").about("Serve the protocol on stdin/stdout"))
		.subcommand(
			Command::new("pserver")
				.about("Password server on a TCP port")
				.arg(Arg::new("listen").long("listen").default_value("0.0.0.0:2401")),
		)
		.subcommand(
			Command::new("checkout")
				.visible_alias("co")
				.about("Check out modules")
				.arg(Arg::new("modules").required(true).action(ArgAction::Append).num_args(1..)),
		)
		.subcommand(
			Command::new("export")
				.about("Check out modules without administrative files")
				.arg(Arg::new("modules").required(true).action(ArgAction::Append).num_args(1..)),
		)
		.subcommand(
			Command::new("update")
				.visible_alias("up")
				.about("Bring the working copy up to date")
				.arg(Arg::new("build-dirs").short('d').action(ArgAction::SetTrue))
				.arg(Arg::new("prune").short('P').action(ArgAction::SetTrue))
				.arg(files_arg()),
		)
		.subcommand(
			Command::new("commit")
				.visible_alias("ci")
				.about("Check in changes")
				.arg(Arg::new("message").short('m').value_name("MESSAGE"))
				.arg(files_arg()),
		)
		.subcommand(
			Command::new("add")
				.about("Schedule files for addition")
				.arg(Arg::new("files").required(true).action(ArgAction::Append).num_args(1..)),
		)
		.subcommand(
			Command::new("remove")
				.visible_alias("rm")
				.about("Schedule files for removal")
				.arg(Arg::new("files").required(true).action(ArgAction::Append).num_args(1..)),
		)
		.subcommand(Command::new("status").about("Show file status").arg(files_arg()))
		.subcommand(Command::new("version").about("Show client and server versions"))
		.get_matches();

	init_tracing();

	match matches.subcommand() {
		Some(("server", _)) => {
			let config = load_config(&matches, Side::Server)?;
			server::install_memory_handler();
			server::serve_stdio(Arc::new(config)).await?;
		}
		Some(("pserver", sub)) => {
			let config = load_config(&matches, Side::Server)?;
			let addr = sub.get_one::<String>("listen").ok_or("pserver: listen address required")?;
			server::serve_pserver(Arc::new(config), addr).await?;
		}
		_ => {
			let config = load_config(&matches, Side::Client)?;
			if !run_client(config, &matches).await? {
				process::exit(1);
			}
		}
	}
	Ok(())
}

// vim: ts=4
