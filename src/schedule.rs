use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveTime, TimeZone};
use fs2::FileExt;
use std::{
    fs::{self, File, OpenOptions},
    path::Path,
    time::Duration,
};

/// Acquire an exclusive file lock; keep the file handle alive to hold the lock.
pub fn acquire_lock(lock_path: &Path) -> Result<File> {
    if let Some(dir) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(lock_path)
        .with_context(|| format!("open lock file {}", lock_path.display()))?;
    file.lock_exclusive()
        .with_context(|| format!("lock {}", lock_path.display()))?;
    Ok(file)
}

/// Parse HH:MM to NaiveTime
pub fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    let parts: Vec<_> = s.trim().split(':').collect();
    if parts.len() != 2 {
        bail!("bad time format {s:?}, expected HH:MM");
    }
    let h: u32 = parts[0].parse()?;
    let m: u32 = parts[1].parse()?;
    NaiveTime::from_hms_opt(h, m, 0).context("invalid hh:mm")
}

/// Duration until the next local occurrence of time `t`
pub fn duration_until_next_local(t: NaiveTime) -> Result<Duration> {
    let now_local = Local::now();
    let today = now_local.date_naive();
    let day = if now_local.naive_local() < today.and_time(t) {
        today
    } else {
        today.succ_opt().context("date overflow")?
    };
    // a DST gap can swallow the target time; take the earliest valid reading
    let next = Local
        .from_local_datetime(&day.and_time(t))
        .earliest()
        .with_context(|| format!("{} {} does not exist in local time", day, t))?;
    let dur = next - now_local;
    Ok(Duration::from_millis(dur.num_milliseconds().max(0) as u64))
}

/// Crontab line that refreshes the dashboard every day at 08:00.
pub fn cron_hint(exe: &Path, data_dir: &Path, out: &Path) -> String {
    let log = out.join("dashboard.log");
    format!(
        "0 8 * * * {} dashboard --data-dir {} --out {} >> {} 2>&1",
        exe.display(),
        data_dir.display(),
        out.display(),
        log.display()
    )
}

pub fn print_cron_hint(exe: &Path, data_dir: &Path, out: &Path) {
    println!();
    println!("{}", "─".repeat(70));
    println!("To auto-refresh daily at 8am, run  crontab -e  and add:");
    println!();
    println!("  {}", cron_hint(exe, data_dir, out));
    println!("{}", "─".repeat(70));
}
