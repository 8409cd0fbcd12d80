//! Client commands
//!
//! Each operation builds the arguments and the working-copy scope of one
//! server command and runs it. `update` asks for deltas when the server
//! can send them and fetches whole files again for every delta that did
//! not apply.

use std::fs;
use std::io;

use super::{Client, Scope};
use crate::error::ClientResult;
use crate::logging::*;
use crate::sync::Notice;

/// Update passes before giving up on unpatchable files
const MAX_UPDATE_PASSES: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
	/// Create directories that exist in the repository but not locally (`-d`)
	pub build_dirs: bool,
	/// Skip directories without live files (`-P`)
	pub prune: bool,
}

fn strings(args: &[&str]) -> Vec<String> {
	args.iter().map(|a| a.to_string()).collect()
}

/// Scope for a file list: the whole tree when it is empty
fn scope_for(files: &[String]) -> Scope {
	if files.is_empty() {
		Scope::Tree
	} else {
		Scope::Files(files.to_vec())
	}
}

impl Client {
	/// `checkout` (or `export`) of `modules` under the top directory
	pub async fn checkout(&mut self, modules: &[String], export: bool) -> ClientResult<()> {
		let toplevel = self.root.directory().to_string();
		self.sync.set_toplevel_repos(&toplevel);
		self.sync.set_export(export);
		let command = if export { "export" } else { "co" };
		self.run_command(command, modules, &Scope::Root).await
	}

	/// `update`, refetching files whose deltas could not be applied
	pub async fn update(&mut self, files: &[String], options: UpdateOptions) -> ClientResult<()> {
		let mut base = Vec::new();
		if options.build_dirs {
			base.push("-d".to_string());
		}
		if options.prune {
			base.push("-P".to_string());
		}

		let mut args = base.clone();
		if self.supports_request("update-patches") {
			args.push("-u".to_string());
		}
		args.extend(files.iter().cloned());
		let mut result = self.run_command("update", &args, &scope_for(files)).await;

		for _ in 1..MAX_UPDATE_PASSES {
			let failed: Vec<String> =
				self.sync.take_failed_patches().into_iter().map(|p| p.trim_start_matches("./").to_string()).collect();
			if failed.is_empty() {
				break;
			}
			let text = format!("{} client: refetching unpatchable files", self.program());
			self.emit(Notice::Err(text));
			for path in &failed {
				match fs::remove_file(self.top().join(path)) {
					Err(e) if e.kind() != io::ErrorKind::NotFound => {
						warn!("[client] cannot remove {} before refetch: {}", path, e);
					}
					_ => {}
				}
			}
			let mut args = base.clone();
			args.extend(failed.iter().cloned());
			let again = self.run_command("update", &args, &Scope::Files(failed)).await;
			if result.is_ok() {
				result = again;
			}
		}
		result
	}

	/// `ci -m <message>`
	pub async fn commit(&mut self, files: &[String], message: &str) -> ClientResult<()> {
		let mut args = strings(&["-m", message]);
		args.extend(files.iter().cloned());
		self.run_command("ci", &args, &scope_for(files)).await
	}

	/// Schedule new files for addition
	pub async fn add(&mut self, files: &[String]) -> ClientResult<()> {
		self.run_command("add", files, &Scope::Files(files.to_vec())).await
	}

	/// Delete `files` locally and schedule their removal
	pub async fn remove(&mut self, files: &[String]) -> ClientResult<()> {
		for file in files {
			match fs::remove_file(self.top().join(file)) {
				Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
				_ => {}
			}
		}
		self.run_command("remove", files, &Scope::Files(files.to_vec())).await
	}

	pub async fn status(&mut self, files: &[String]) -> ClientResult<()> {
		self.run_command("status", files, &scope_for(files)).await
	}

	/// Client version, then the server's if it can tell
	pub async fn version(&mut self) -> ClientResult<()> {
		let text = format!("Client: cvsproto {} (client/server)", env!("CARGO_PKG_VERSION"));
		self.emit(Notice::Out(text));
		if !self.supports_request("version") {
			return Ok(());
		}
		self.emit(Notice::Out("Server: ".to_string()));
		self.run_command("version", &[], &Scope::Nothing).await
	}

	/// Ask the server which directories `modules` stand for
	pub async fn expand_modules(&mut self, modules: &[String]) -> ClientResult<Vec<String>> {
		self.modules.clear();
		if !self.supports_request("expand-modules") {
			return Ok(modules.to_vec());
		}
		self.run_command("expand-modules", modules, &Scope::Root).await?;
		Ok(self.modules.clone())
	}

	/// `noop`: deliver pending notifications and check the session
	pub async fn noop(&mut self) -> ClientResult<()> {
		self.run_command("noop", &[], &Scope::Nothing).await
	}
}


// vim: ts=4
