use std::ffi::OsStr;
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Kills the child on drop unless it already exited.
pub struct ChildGuard(pub Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if matches!(self.0.try_wait(), Ok(None)) {
            drop(self.0.kill());
            drop(self.0.wait());
        }
    }
}

/// Spawn the `loadherd` binary with captured output.
///
/// # Errors
///
/// Returns an error if the binary path is unknown or spawning fails.
pub fn spawn_loadherd<I, S>(args: I) -> Result<ChildGuard, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let bin = loadherd_bin()?;
    Command::new(bin)
        .args(args)
        .env("LOADHERD_LOG", "info")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map(ChildGuard)
        .map_err(|err| format!("spawn loadherd failed: {}", err))
}

/// Wait for a child process to exit.
///
/// # Errors
///
/// Returns an error if waiting fails or the timeout is exceeded.
pub fn wait_for_exit(child: &mut Child, timeout: Duration) -> Result<ExitStatus, String> {
    let start = Instant::now();
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|err| format!("wait failed: {}", err))?
        {
            return Ok(status);
        }
        if start.elapsed() > timeout {
            drop(child.kill());
            return Err("process timed out".to_owned());
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Wait until something accepts connections on `addr`.
///
/// # Errors
///
/// Returns an error if nothing listens before the timeout.
pub fn wait_for_listener(addr: SocketAddr, timeout: Duration) -> Result<(), String> {
    let start = Instant::now();
    while TcpStream::connect_timeout(&addr, Duration::from_millis(100)).is_err() {
        if start.elapsed() > timeout {
            return Err(format!("nothing listening on {}", addr));
        }
        thread::sleep(Duration::from_millis(50));
    }
    Ok(())
}

/// Read the captured stdout and stderr of an exited child.
///
/// # Errors
///
/// Returns an error if either stream cannot be read.
pub fn read_child_output(child: &mut Child) -> Result<(String, String), String> {
    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        out.read_to_string(&mut stdout)
            .map_err(|err| format!("read stdout failed: {}", err))?;
    }
    let mut stderr = String::new();
    if let Some(mut err_out) = child.stderr.take() {
        err_out
            .read_to_string(&mut stderr)
            .map_err(|err| format!("read stderr failed: {}", err))?;
    }
    Ok((stdout, stderr))
}

/// Pick a loopback address with a currently free port.
///
/// # Errors
///
/// Returns an error if no port can be bound.
pub fn pick_addr() -> Result<SocketAddr, String> {
    TcpListener::bind("127.0.0.1:0")
        .map_err(|err| format!("bind port failed: {}", err))?
        .local_addr()
        .map_err(|err| format!("port addr failed: {}", err))
}

fn loadherd_bin() -> Result<String, String> {
    option_env!("CARGO_BIN_EXE_loadherd").map_or_else(
        || Err("CARGO_BIN_EXE_loadherd missing at compile time.".to_owned()),
        |path| Ok(path.to_owned()),
    )
}
