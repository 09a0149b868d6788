use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

/// Startup console: spinners on an interactive stderr, `==>` lines otherwise.
#[derive(Clone, Copy, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    /// `flag` is `auto`, `plain` or `pretty`. Pretty output also needs a TTY.
    pub fn detect(flag: &str) -> Self {
        let is_tty = std::io::stderr().is_terminal();
        let pretty = match flag {
            "plain" => false,
            "pretty" => is_tty,
            _ => is_tty && std::env::var_os("CI").is_none(),
        };
        Self { pretty }
    }

    pub fn stage(&self, name: &str) -> Stage {
        let spinner = if self.pretty {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.set_style(
                ProgressStyle::with_template("{spinner:.cyan} {msg} {elapsed:.dim}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.set_message(name.to_string());
            spinner.enable_steady_tick(Duration::from_millis(100));
            Some(spinner)
        } else {
            eprintln!("==> {}", name);
            None
        };
        Stage {
            name: name.to_string(),
            started: Instant::now(),
            spinner,
            finished: false,
        }
    }

    pub fn note(&self, message: &str) {
        eprintln!("    {}", message);
    }
}

/// One startup step. Dropping it without `ok`/`warn` marks it failed, so
/// an early `?` return shows up on the console.
pub struct Stage {
    name: String,
    started: Instant,
    spinner: Option<ProgressBar>,
    finished: bool,
}

impl Stage {
    pub fn ok(mut self) {
        self.finish("✔", None);
    }

    /// Finished, but degraded.
    pub fn warn(mut self, detail: &str) {
        self.finish("!", Some(detail));
    }

    fn finish(&mut self, mark: &str, detail: Option<&str>) {
        self.finished = true;
        let mut line = format!("{} {} ({})", mark, self.name, short(self.started.elapsed()));
        if let Some(detail) = detail {
            line.push_str(": ");
            line.push_str(detail);
        }
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(line),
            None => eprintln!("{}", line),
        }
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        if !self.finished {
            self.finish("✘", Some("failed"));
        }
    }
}

fn short(elapsed: Duration) -> String {
    if elapsed >= Duration::from_secs(1) {
        format!("{:.1}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}
