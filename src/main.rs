use anyhow::{bail, Context};
use dlqueue_lib::modules::downloads::{
    DownloadMode, DownloadOptions, FileDescriptor, Job, ProxyConfig, ProxyMode, QueueSnapshot,
};
use dlqueue_lib::shared::config::AppConfig;
use dlqueue_lib::log_info;
use dlqueue_lib::shared::utils::init_logger;
use std::time::Duration;

const USAGE: &str = "usage: dlqueue [--audio] [--file] [--proxy <url>] <url>...";

struct Args {
    audio: bool,
    direct_files: bool,
    proxy: Option<String>,
    urls: Vec<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        audio: false,
        direct_files: false,
        proxy: None,
        urls: Vec::new(),
    };
    let mut raw = std::env::args().skip(1);
    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--audio" => args.audio = true,
            "--file" => args.direct_files = true,
            "--proxy" => match raw.next() {
                Some(url) => args.proxy = Some(url),
                None => bail!("--proxy needs a URL\n{}", USAGE),
            },
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            flag if flag.starts_with("--") => bail!("unknown flag {}\n{}", flag, USAGE),
            _ => args.urls.push(arg),
        }
    }
    Ok(args)
}

fn file_name_from(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "download".to_string())
}

fn job_line(job: &Job) -> String {
    format!(
        "{:>5.1}% {:<11} {} {}",
        job.progress,
        job.status.to_string(),
        job.title,
        job.speed
    )
    .trim_end()
    .to_string()
}

/// Status summary, then one block per group, then loose jobs
fn report_lines(snapshot: &QueueSnapshot) -> Vec<String> {
    let mut lines = vec![format!(
        "{} downloading, {} active, {} pending{}",
        snapshot.downloading_count(),
        snapshot.active_count(),
        snapshot.pending_count(),
        if snapshot.paused { " (paused)" } else { "" }
    )];

    for group in snapshot.groups() {
        lines.push(format!(
            "[{}] {}/{} done, {} failed",
            group.group_title, group.progress.completed, group.progress.total, group.progress.failed
        ));
        lines.extend(group.jobs.iter().map(|job| format!("  {}", job_line(job))));
    }
    lines.extend(snapshot.ungrouped().into_iter().map(job_line));
    lines
}

fn report(snapshot: &QueueSnapshot) {
    for line in report_lines(snapshot) {
        log_info!("{}", line);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();
    let args = parse_args()?;
    let config = AppConfig::load().context("invalid configuration")?;

    let (queue, _settings) = dlqueue_lib::build_queue(&config)
        .await
        .context("failed to start download queue")?;

    let restored = queue.restore().await;
    if restored > 0 {
        log_info!("Resuming {} stored job(s)", restored);
    }

    let proxy = args.proxy.map(|url| ProxyConfig {
        mode: ProxyMode::Custom,
        custom_url: Some(url),
        fallback: false,
    });
    let options = DownloadOptions {
        mode: if args.audio {
            DownloadMode::Audio
        } else {
            DownloadMode::Auto
        },
        proxy,
        ..Default::default()
    };
    for url in &args.urls {
        if args.direct_files {
            queue
                .add_file(FileDescriptor {
                    url: url.clone(),
                    filename: file_name_from(url),
                    ..Default::default()
                })
                .await;
        } else {
            queue.add(url, options.clone(), None).await;
        }
    }

    if queue.snapshot().jobs.is_empty() {
        println!("{}", USAGE);
        queue.shutdown().await;
        return Ok(());
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    let idle = queue.wait_idle();
    tokio::pin!(idle);
    loop {
        tokio::select! {
            _ = &mut idle => break,
            _ = ticker.tick() => report(&queue.snapshot()),
            _ = tokio::signal::ctrl_c() => {
                log_info!("Interrupted; saving queue");
                break;
            }
        }
    }

    queue.shutdown().await;
    Ok(())
}
