use chrono::{Duration, Local};
use rollsmith::{
    backup_path, Error, ExpirationRule, ExpirationScale, LockMode, ManualClock, RotatingFileWriter,
    RotationPolicy, When, WriterOptions,
};
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

fn writer_with(path: &Path, policy: RotationPolicy, clock: &ManualClock) -> RotatingFileWriter {
    let options = WriterOptions { lock_mode: LockMode::Exclusive, clock: Arc::new(clock.clone()) };
    RotatingFileWriter::with_options(path, policy, options).unwrap()
}

/// Every generation, oldest first: base.N .. base.1, then the active file.
fn generations(path: &Path, max: usize) -> Vec<String> {
    let mut out: Vec<String> = (1..=max)
        .rev()
        .map(|n| backup_path(path, n))
        .filter(|p| p.exists())
        .map(|p| fs::read_to_string(p).unwrap())
        .collect();
    if path.exists() {
        out.push(fs::read_to_string(path).unwrap());
    }
    out
}

fn set_mtime(path: &Path, when: chrono::DateTime<Local>) {
    File::options().write(true).open(path).unwrap().set_modified(SystemTime::from(when)).unwrap();
}

#[test]
fn size_rotation_never_loses_or_duplicates_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("size.log");
    let clock = ManualClock::new(Local::now());
    let policy = RotationPolicy::builder().max_bytes(100).backup_count(500).build().unwrap();
    let w = writer_with(&path, policy, &clock);

    let mut expected = String::new();
    for i in 0..300 {
        let line = format!("message {i} {}\n", "x".repeat(i % 17));
        expected.push_str(&line);
        w.write(line.as_bytes()).unwrap();
    }
    w.close().unwrap();

    let gens = generations(&path, 500);
    assert!(gens.len() > 10, "expected many rollovers, got {}", gens.len());
    assert_eq!(gens.concat(), expected);

    // every rotated-out file stayed under the threshold
    for (n, text) in gens.iter().take(gens.len() - 1).enumerate() {
        assert!(text.len() < 100, "generation {n} has {} bytes", text.len());
    }
}

#[test]
fn backup_count_bounds_the_chain_and_newest_is_first() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("count.log");
    let clock = ManualClock::new(Local::now());
    let policy = RotationPolicy::builder().max_bytes(8).backup_count(3).build().unwrap();
    let w = writer_with(&path, policy, &clock);

    for i in 0..10 {
        w.write(format!("gen-{i}\n").as_bytes()).unwrap();
    }

    assert!(backup_path(&path, 3).exists());
    assert!(!backup_path(&path, 4).exists());
    assert_eq!(fs::read_to_string(&path).unwrap(), "gen-9\n");
    assert_eq!(fs::read_to_string(backup_path(&path, 1)).unwrap(), "gen-8\n");
    assert_eq!(fs::read_to_string(backup_path(&path, 2)).unwrap(), "gen-7\n");
    assert_eq!(fs::read_to_string(backup_path(&path, 3)).unwrap(), "gen-6\n");
}

#[test]
fn writes_a_full_period_apart_land_in_distinct_generations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("time.log");
    let clock = ManualClock::new(Local::now());
    let policy = RotationPolicy::builder().when(When::Second).interval(10).build().unwrap();
    let w = writer_with(&path, policy, &clock);

    w.write(b"early\n").unwrap();
    clock.advance(Duration::seconds(10));
    w.write(b"late\n").unwrap();

    assert_eq!(generations(&path, 5), vec!["early\n".to_string(), "late\n".to_string()]);
}

#[test]
fn combined_triggers_fire_independently() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("both.log");
    let clock = ManualClock::new(Local::now());
    let policy = RotationPolicy::builder()
        .when(When::Minute)
        .max_bytes(12)
        .backup_count(10)
        .build()
        .unwrap();
    let w = writer_with(&path, policy, &clock);

    w.write(b"aaaa\n").unwrap();
    w.write(b"bbbb\n").unwrap();
    w.write(b"cccc\n").unwrap(); // size
    clock.advance(Duration::minutes(1));
    w.write(b"dd\n").unwrap(); // time

    assert_eq!(
        generations(&path, 10),
        vec!["aaaa\nbbbb\n".to_string(), "cccc\n".to_string(), "dd\n".to_string()]
    );
}

#[test]
fn restart_with_a_stale_file_rolls_on_first_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("restart.log");
    let now = Local::now();
    fs::write(&path, "from last run\n").unwrap();
    set_mtime(&path, now - Duration::hours(2));

    let clock = ManualClock::new(now);
    let policy = RotationPolicy::builder().when(When::Hour).build().unwrap();
    let w = writer_with(&path, policy, &clock);
    w.write(b"fresh\n").unwrap();

    assert_eq!(fs::read_to_string(backup_path(&path, 1)).unwrap(), "from last run\n");
    assert_eq!(fs::read_to_string(&path).unwrap(), "fresh\n");
}

#[test]
fn restart_with_a_recent_file_keeps_appending() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recent.log");
    let now = Local::now();
    fs::write(&path, "from last run\n").unwrap();
    set_mtime(&path, now - Duration::minutes(10));

    let clock = ManualClock::new(now);
    let policy = RotationPolicy::builder().when(When::Hour).build().unwrap();
    let w = writer_with(&path, policy, &clock);
    w.write(b"fresh\n").unwrap();

    assert!(!backup_path(&path, 1).exists());
    assert_eq!(fs::read_to_string(&path).unwrap(), "from last run\nfresh\n");
}

#[test]
fn retention_prunes_by_age_after_count_pruning() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ret.log");
    let now = Local::now();

    fs::write(backup_path(&path, 5), "old\n").unwrap();
    set_mtime(&backup_path(&path, 5), now - Duration::hours(2));
    fs::write(backup_path(&path, 6), "recent\n").unwrap();
    set_mtime(&backup_path(&path, 6), now - Duration::minutes(5));

    let clock = ManualClock::new(now);
    let policy = RotationPolicy::builder()
        .max_bytes(10)
        .backup_count(10)
        .expiration(ExpirationRule::new(ExpirationScale::Minutes, 30).unwrap())
        .build()
        .unwrap();
    let w = writer_with(&path, policy, &clock);
    w.write(b"first\n").unwrap();
    w.write(b"second\n").unwrap();

    // the chain shifted .5 -> .6 and .6 -> .7, then the sweep dropped the old one
    assert!(!backup_path(&path, 6).exists());
    assert_eq!(fs::read_to_string(backup_path(&path, 7)).unwrap(), "recent\n");
    assert_eq!(fs::read_to_string(backup_path(&path, 1)).unwrap(), "first\n");
    assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
}

#[test]
fn calendar_day_expiry_drops_yesterdays_backups() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cal.log");
    let now = Local::now();
    fs::write(backup_path(&path, 3), "yesterday\n").unwrap();
    set_mtime(&backup_path(&path, 3), now - Duration::days(1) - Duration::minutes(1));

    let clock = ManualClock::new(now);
    let policy = RotationPolicy::builder()
        .backup_count(2)
        .expiration(ExpirationRule::new(ExpirationScale::CalendarDay, 0).unwrap())
        .build()
        .unwrap();
    let w = writer_with(&path, policy, &clock);
    w.write(b"today\n").unwrap();
    w.rotate().unwrap();

    assert!(!backup_path(&path, 3).exists());
    assert_eq!(fs::read_to_string(backup_path(&path, 1)).unwrap(), "today\n");
}

#[test]
fn closing_twice_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("close.log");
    let w = RotatingFileWriter::new(&path, RotationPolicy::default()).unwrap();
    w.write(b"kept\n").unwrap();
    w.close().unwrap();
    w.close().unwrap();
    assert!(matches!(w.write(b"lost\n"), Err(Error::WriterClosed { .. })));
    assert_eq!(fs::read_to_string(&path).unwrap(), "kept\n");
}

#[test]
fn invalid_policies_fail_at_construction() {
    assert!(matches!(
        RotationPolicy::builder().backup_count(-1).build(),
        Err(Error::Configuration { field: "backup_count", .. })
    ));
    assert!(matches!(
        RotationPolicy::builder().when(When::Hour).interval(-5).build(),
        Err(Error::Configuration { field: "interval", .. })
    ));
}

#[test]
fn pid_decoration_names_the_active_file() {
    let dir = tempfile::tempdir().unwrap();
    let policy = RotationPolicy::builder().append_pid(true).max_bytes(6).build().unwrap();
    let w = RotatingFileWriter::new(dir.path().join("app.log"), policy).unwrap();
    let expected = dir.path().join(format!("app.{}.log", std::process::id()));
    assert_eq!(w.path(), expected);

    w.write(b"one\n").unwrap();
    w.write(b"two\n").unwrap();
    assert_eq!(fs::read_to_string(backup_path(&expected, 1)).unwrap(), "one\n");
}
