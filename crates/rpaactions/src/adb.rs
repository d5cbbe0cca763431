//! adb-backed device driver and connectivity probe

use async_trait::async_trait;
use rpacore::{DeviceDriver, DeviceError, DeviceProbe};
use rparuntime::DriverFactory;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Runs `adb -s <serial> ...` with a time limit
#[derive(Debug, Clone)]
pub struct Adb {
    program: String,
    timeout: Duration,
}

impl Adb {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn run(&self, serial: &str, args: &[&str]) -> Result<Vec<u8>, DeviceError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-s")
            .arg(serial)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| DeviceError::Command {
                device: serial.to_string(),
                reason: format!("adb {} timed out after {:?}", args.join(" "), self.timeout),
            })?
            .map_err(|e| DeviceError::Command {
                device: serial.to_string(),
                reason: format!("failed to spawn {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            return Err(DeviceError::Command {
                device: serial.to_string(),
                reason: format!(
                    "adb {} exited with {}: {}",
                    args.join(" "),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(output.stdout)
    }

    async fn shell(&self, serial: &str, args: &[&str]) -> Result<String, DeviceError> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        let stdout = self.run(serial, &full).await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

/// Driver for one device reachable through adb
pub struct AdbDriver {
    serial: String,
    adb: Adb,
}

impl AdbDriver {
    pub fn new(serial: impl Into<String>, adb: Adb) -> Self {
        Self {
            serial: serial.into(),
            adb,
        }
    }
}

/// `input text` treats spaces as separators
fn escape_input_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            ' ' => out.push_str("%s"),
            '\'' | '"' | '\\' | '&' | '|' | ';' | '<' | '>' | '(' | ')' | '$' | '`' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Parse `wm size` output; an override size wins over the physical one
fn parse_window_size(output: &str) -> Option<(i64, i64)> {
    let mut physical = None;
    let mut override_size = None;
    for line in output.lines() {
        let Some((label, size)) = line.split_once(':') else {
            continue;
        };
        let Some((w, h)) = size.trim().split_once('x') else {
            continue;
        };
        let parsed = (w.trim().parse().ok()?, h.trim().parse().ok()?);
        if label.contains("Override") {
            override_size = Some(parsed);
        } else {
            physical = Some(parsed);
        }
    }
    override_size.or(physical)
}

#[async_trait]
impl DeviceDriver for AdbDriver {
    fn serial(&self) -> &str {
        &self.serial
    }

    async fn click(&self, x: i64, y: i64) -> Result<(), DeviceError> {
        let (x, y) = (x.to_string(), y.to_string());
        self.adb.shell(&self.serial, &["input", "tap", &x, &y]).await?;
        Ok(())
    }

    async fn swipe(
        &self,
        start: (i64, i64),
        end: (i64, i64),
        duration_ms: u64,
    ) -> Result<(), DeviceError> {
        let args = [
            start.0.to_string(),
            start.1.to_string(),
            end.0.to_string(),
            end.1.to_string(),
            duration_ms.to_string(),
        ];
        let mut full = vec!["input", "swipe"];
        full.extend(args.iter().map(String::as_str));
        self.adb.shell(&self.serial, &full).await?;
        Ok(())
    }

    async fn window_size(&self) -> Result<(i64, i64), DeviceError> {
        let output = self.adb.shell(&self.serial, &["wm", "size"]).await?;
        parse_window_size(&output).ok_or_else(|| DeviceError::Command {
            device: self.serial.clone(),
            reason: format!("unexpected wm size output: {}", output.trim()),
        })
    }

    async fn input_text(&self, text: &str) -> Result<(), DeviceError> {
        let escaped = escape_input_text(text);
        self.adb.shell(&self.serial, &["input", "text", &escaped]).await?;
        Ok(())
    }

    async fn press_back(&self) -> Result<(), DeviceError> {
        self.adb.shell(&self.serial, &["input", "keyevent", "4"]).await?;
        Ok(())
    }

    async fn app_start(&self, package: &str) -> Result<(), DeviceError> {
        self.adb
            .shell(
                &self.serial,
                &["monkey", "-p", package, "-c", "android.intent.category.LAUNCHER", "1"],
            )
            .await?;
        Ok(())
    }

    async fn app_stop(&self, package: &str) -> Result<(), DeviceError> {
        self.adb.shell(&self.serial, &["am", "force-stop", package]).await?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DeviceError> {
        self.adb.run(&self.serial, &["exec-out", "screencap", "-p"]).await
    }
}

/// Builds [`AdbDriver`]s sharing one adb configuration
pub struct AdbDriverFactory {
    adb: Adb,
}

impl AdbDriverFactory {
    pub fn new(adb: Adb) -> Self {
        Self { adb }
    }
}

impl DriverFactory for AdbDriverFactory {
    fn connect(&self, device_id: &str) -> Result<Arc<dyn DeviceDriver>, DeviceError> {
        Ok(Arc::new(AdbDriver::new(device_id, self.adb.clone())))
    }
}

/// Probe that asks adb for the device state
pub struct AdbProbe {
    adb: Adb,
}

impl AdbProbe {
    pub fn new(adb: Adb) -> Self {
        Self { adb }
    }
}

#[async_trait]
impl DeviceProbe for AdbProbe {
    async fn probe(&self, device_id: &str) -> Result<(), DeviceError> {
        let stdout = self.adb.run(device_id, &["get-state"]).await.map_err(|e| match e {
            DeviceError::Command { device, reason } => DeviceError::Connectivity { device, reason },
            other => other,
        })?;
        let state = String::from_utf8_lossy(&stdout);
        if state.trim() == "device" {
            Ok(())
        } else {
            Err(DeviceError::Connectivity {
                device: device_id.to_string(),
                reason: format!("state is '{}'", state.trim()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_window_size() {
        assert_eq!(parse_window_size("Physical size: 1080x2400\n"), Some((1080, 2400)));
        assert_eq!(
            parse_window_size("Physical size: 1080x2400\nOverride size: 720x1600\n"),
            Some((720, 1600))
        );
        assert_eq!(parse_window_size("error: closed"), None);
    }

    #[test]
    fn test_escape_input_text() {
        assert_eq!(escape_input_text("iced latte"), "iced%slatte");
        assert_eq!(escape_input_text("a&b"), "a\\&b");
    }

    #[tokio::test]
    async fn test_missing_adb_binary_is_a_command_error() {
        let adb = Adb::new("/nonexistent/adb", Duration::from_secs(1));
        let err = AdbDriver::new("dev1", adb.clone()).press_back().await.unwrap_err();
        assert!(matches!(err, DeviceError::Command { .. }));

        let err = AdbProbe::new(adb).probe("dev1").await.unwrap_err();
        assert!(matches!(err, DeviceError::Connectivity { .. }));
    }
}
