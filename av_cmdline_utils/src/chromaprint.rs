use std::{
    io::prelude::*,
    path::Path,
    process::{Command, Stdio},
    time::Duration,
};

#[cfg(target_family = "windows")]
use std::os::windows::process::CommandExt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wait_timeout::ChildExt;

//fpcalc decodes the whole audio track before printing anything; allow it a
//generous window before declaring it hung
const FPCALC_TIMEOUT_SECS: u64 = 300;

/// Various causes of failure when invoking the fpcalc (chromaprint) command
/// line tool.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ChromaprintError {
    /// fpcalc was not found. It ships with the chromaprint package on most
    /// distributions.
    #[error("fpcalc not found. Make sure chromaprint/fpcalc is installed and visible on the command line")]
    FpcalcNotFound,

    /// Io error occurred while executing fpcalc
    #[error("fpcalc IO error: {0}")]
    Io(String),

    /// fpcalc returned a nonzero exit code, typically because the input has
    /// no decodable audio track.
    #[error("internal fpcalc failure: {0}")]
    FpcalcInternal(String),

    /// fpcalc did not complete within the allowed time.
    #[error("fpcalc did not complete within the allowed time")]
    Timeout,

    /// fpcalc output could not be parsed.
    #[error("could not parse fpcalc output: {0}")]
    Parse(String),
}

#[derive(Deserialize)]
struct FpcalcOutput {
    #[serde(default)]
    fingerprint: Vec<u32>,
}

/// Run fpcalc over the audio track of `src_path` and return the raw
/// sub-fingerprint sequence, one value per chromaprint time offset, in
/// stream order.
///
/// Values are unsigned on fpcalc's side but the fingerprint index stores
/// them in a signed 32-bit column, so they are reinterpreted bit-for-bit
/// here. The chromaprint algorithm itself lives entirely inside fpcalc;
/// only the invocation and parse happen in this crate.
pub fn read_audio_subfingerprints(
    src_path: impl AsRef<Path>,
) -> Result<Vec<i32>, ChromaprintError> {
    let mut command = Command::new("fpcalc");
    command
        .arg("-raw")
        .arg("-json")
        .arg(src_path.as_ref())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(target_family = "windows")]
    command.creation_flags(winapi::um::winbase::CREATE_NO_WINDOW);

    let mut child = command.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ChromaprintError::FpcalcNotFound,
        _ => ChromaprintError::Io(format!("{:?}", e.kind())),
    })?;

    let mut stderr = child.stderr.take().expect("stderr was piped");
    let stderr_thread = std::thread::spawn(move || {
        let mut acc = Vec::new();
        let _read_error = stderr.read_to_end(&mut acc);
        acc
    });

    let mut stdout = Vec::new();
    child
        .stdout
        .take()
        .expect("stdout was piped")
        .read_to_end(&mut stdout)
        .map_err(|e| ChromaprintError::Io(format!("{:?}", e.kind())))?;

    let status = match child.wait_timeout(Duration::from_secs(FPCALC_TIMEOUT_SECS)) {
        Err(e) => return Err(ChromaprintError::Io(format!("{:?}", e.kind()))),
        Ok(None) => {
            let _kill_error = child.kill();
            let _wait_error = child.wait();
            return Err(ChromaprintError::Timeout);
        }
        Ok(Some(status)) => status,
    };

    if !status.success() {
        let stderr = stderr_thread.join().unwrap_or_default();
        let message = String::from_utf8_lossy(&stderr).chars().take(500).collect();
        return Err(ChromaprintError::FpcalcInternal(message));
    }

    let parsed: FpcalcOutput = serde_json::from_slice(&stdout)
        .map_err(|e| ChromaprintError::Parse(format!("{e}")))?;

    Ok(parsed
        .fingerprint
        .into_iter()
        .map(|sub_hash| sub_hash as i32)
        .collect())
}

pub fn fpcalc_is_callable() -> bool {
    Command::new("fpcalc")
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
