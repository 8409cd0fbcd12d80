//! Delta formats used to update a file in place
//!
//! `Rcs-diff` carries an RCS change script (`dL N` deletes N lines starting
//! at line L, `aL N` appends the N following script lines after line L; line
//! numbers always refer to the original). `Patched` carries a unified diff.
//! Both are applied in memory and refuse to guess when the target does not
//! match.

/// Split keeping line terminators; a final unterminated line is kept as is
pub fn split_lines(data: &[u8]) -> Vec<&[u8]> {
	let mut lines = Vec::new();
	let mut start = 0;
	for (i, &b) in data.iter().enumerate() {
		if b == b'\n' {
			lines.push(&data[start..=i]);
			start = i + 1;
		}
	}
	if start < data.len() {
		lines.push(&data[start..]);
	}
	lines
}

// ============================================================================
// RCS CHANGE SCRIPTS
// ============================================================================

fn parse_command(line: &[u8]) -> Result<(u8, usize, usize), String> {
	let text = String::from_utf8_lossy(line);
	let text = text.trim_end();
	let bad = || format!("bad change script command `{}'", text);
	let op = *line.first().ok_or_else(bad)?;
	let (at, count) = text.get(1..).and_then(|t| t.split_once(' ')).ok_or_else(bad)?;
	let at = at.parse().map_err(|_| bad())?;
	let count = count.parse().map_err(|_| bad())?;
	Ok((op, at, count))
}

/// Apply an RCS change script to `original`
pub fn apply_rcs_diff(original: &[u8], script: &[u8]) -> Result<Vec<u8>, String> {
	let lines = split_lines(original);
	let commands = split_lines(script);
	let mut out = Vec::with_capacity(original.len() + script.len());
	let mut pos = 0;
	let mut i = 0;
	while i < commands.len() {
		let (op, at, count) = parse_command(commands[i])?;
		i += 1;
		match op {
			b'd' => {
				if at == 0 || at - 1 < pos || at - 1 + count > lines.len() {
					return Err(format!("delete of lines {}..{} out of order or past end", at, at + count));
				}
				lines[pos..at - 1].iter().for_each(|l| out.extend_from_slice(l));
				pos = at - 1 + count;
			}
			b'a' => {
				if at < pos || at > lines.len() {
					return Err(format!("append after line {} out of order or past end", at));
				}
				lines[pos..at].iter().for_each(|l| out.extend_from_slice(l));
				pos = at;
				if i + count > commands.len() {
					return Err("change script ends inside appended text".to_string());
				}
				commands[i..i + count].iter().for_each(|l| out.extend_from_slice(l));
				i += count;
			}
			other => return Err(format!("unknown change script command `{}'", other as char)),
		}
	}
	lines[pos..].iter().for_each(|l| out.extend_from_slice(l));
	Ok(out)
}

/// Largest `old lines * new lines` product a diff is computed for
const DIFF_CELL_LIMIT: usize = 4_000_000;

/// Change script turning `old` into `new`
///
/// `None` when the inputs are too large to diff cheaply; callers then send
/// the whole file.
pub fn rcs_diff(old: &[u8], new: &[u8]) -> Option<Vec<u8>> {
	let a = split_lines(old);
	let b = split_lines(new);
	let prefix = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
	let suffix = a[prefix..]
		.iter()
		.rev()
		.zip(b[prefix..].iter().rev())
		.take_while(|(x, y)| x == y)
		.count();
	let a_mid = &a[prefix..a.len() - suffix];
	let b_mid = &b[prefix..b.len() - suffix];
	let (n, m) = (a_mid.len(), b_mid.len());
	if (n + 1).saturating_mul(m + 1) > DIFF_CELL_LIMIT {
		return None;
	}

	// lcs[i][j]: common subsequence length of a_mid[i..] and b_mid[j..]
	let width = m + 1;
	let mut lcs = vec![0u32; (n + 1) * width];
	for i in (0..n).rev() {
		for j in (0..m).rev() {
			lcs[i * width + j] = if a_mid[i] == b_mid[j] {
				lcs[(i + 1) * width + j + 1] + 1
			} else {
				lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
			};
		}
	}

	enum Edit {
		Delete(usize),
		Insert(usize, usize),
	}
	let mut edits = Vec::new();
	let (mut i, mut j) = (0, 0);
	while i < n || j < m {
		if i < n && j < m && a_mid[i] == b_mid[j] {
			i += 1;
			j += 1;
		} else if j >= m || (i < n && lcs[(i + 1) * width + j] >= lcs[i * width + j + 1]) {
			edits.push(Edit::Delete(i));
			i += 1;
		} else {
			edits.push(Edit::Insert(i, j));
			j += 1;
		}
	}

	let mut script = Vec::new();
	let mut k = 0;
	while k < edits.len() {
		match edits[k] {
			Edit::Delete(first) => {
				let mut count = 1;
				while let Some(Edit::Delete(next)) = edits.get(k + count) {
					if *next != first + count {
						break;
					}
					count += 1;
				}
				script.extend_from_slice(format!("d{} {}\n", prefix + first + 1, count).as_bytes());
				k += count;
			}
			Edit::Insert(at, first) => {
				let mut count = 1;
				while let Some(Edit::Insert(next_at, _)) = edits.get(k + count) {
					if *next_at != at {
						break;
					}
					count += 1;
				}
				script.extend_from_slice(format!("a{} {}\n", prefix + at, count).as_bytes());
				b_mid[first..first + count].iter().for_each(|l| script.extend_from_slice(l));
				k += count;
			}
		}
	}
	Some(script)
}

// ============================================================================
// UNIFIED DIFFS
// ============================================================================

struct Hunk {
	old_start: usize,
	old_count: usize,
	new_count: usize,
}

fn parse_range(text: &str) -> Option<(usize, usize)> {
	match text.split_once(',') {
		Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
		None => Some((text.parse().ok()?, 1)),
	}
}

fn parse_hunk_header(line: &[u8]) -> Option<Hunk> {
	let text = String::from_utf8_lossy(line);
	let mut parts = text.strip_prefix("@@ ")?.split_whitespace();
	let (old_start, old_count) = parse_range(parts.next()?.strip_prefix('-')?)?;
	let (_, new_count) = parse_range(parts.next()?.strip_prefix('+')?)?;
	Some(Hunk { old_start, old_count, new_count })
}

fn strip_newline(line: &mut Vec<u8>) {
	if line.last() == Some(&b'\n') {
		line.pop();
	}
}

/// Apply a unified diff to `original`
pub fn apply_unified_diff(original: &[u8], patch: &[u8]) -> Result<Vec<u8>, String> {
	let lines = split_lines(original);
	let patch_lines = split_lines(patch);
	let mut out = Vec::with_capacity(original.len() + patch.len());
	let mut pos = 0;
	let mut hunks = 0;
	let mut k = 0;
	while k < patch_lines.len() {
		let Some(hunk) = parse_hunk_header(patch_lines[k]) else {
			k += 1;
			continue;
		};
		k += 1;
		hunks += 1;

		let mut old: Vec<Vec<u8>> = Vec::new();
		let mut new: Vec<Vec<u8>> = Vec::new();
		// which side the last body line went to, for "\ No newline" markers
		let mut last = (false, false);
		while let Some(&line) = patch_lines.get(k) {
			let marker = line.starts_with(b"\\");
			if !marker && old.len() >= hunk.old_count && new.len() >= hunk.new_count {
				break;
			}
			k += 1;
			let body = line.get(1..).unwrap_or_default().to_vec();
			match line.first() {
				Some(b' ') => {
					old.push(body.clone());
					new.push(body);
					last = (true, true);
				}
				Some(b'\n') => {
					old.push(b"\n".to_vec());
					new.push(b"\n".to_vec());
					last = (true, true);
				}
				Some(b'-') => {
					old.push(body);
					last = (true, false);
				}
				Some(b'+') => {
					new.push(body);
					last = (false, true);
				}
				Some(b'\\') => {
					if let (true, Some(l)) = (last.0, old.last_mut()) {
						strip_newline(l);
					}
					if let (true, Some(l)) = (last.1, new.last_mut()) {
						strip_newline(l);
					}
				}
				_ => return Err(format!("malformed line in hunk #{}", hunks)),
			}
		}
		if old.len() != hunk.old_count || new.len() != hunk.new_count {
			return Err(format!("hunk #{} is truncated", hunks));
		}

		let start = if hunk.old_count == 0 { hunk.old_start } else { hunk.old_start.saturating_sub(1) };
		if start < pos || start + old.len() > lines.len() {
			return Err(format!("hunk #{} FAILED at {}", hunks, hunk.old_start));
		}
		if lines[start..start + old.len()].iter().zip(old.iter()).any(|(have, want)| *have != want.as_slice()) {
			return Err(format!("hunk #{} FAILED at {}", hunks, hunk.old_start));
		}
		lines[pos..start].iter().for_each(|l| out.extend_from_slice(l));
		new.iter().for_each(|l| out.extend_from_slice(l));
		pos = start + old.len();
	}
	if hunks == 0 {
		return Err("no hunks found in patch".to_string());
	}
	lines[pos..].iter().for_each(|l| out.extend_from_slice(l));
	Ok(out)
}


// vim: ts=4
