use rollsmith::{backup_path, RotatingFileWriter, RotationPolicy};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 6;
const WRITES: usize = 150;
const BACKUPS: usize = 400;

fn payload(t: usize, m: usize) -> String {
    format!("<t{t:02}-m{m:04}-{}>\n", "z".repeat((t * 7 + m) % 23))
}

/// Every line from the active file and all backups.
fn all_lines(path: &Path) -> Vec<String> {
    let mut files = vec![path.to_path_buf()];
    files.extend((1..=BACKUPS).map(|n| backup_path(path, n)).filter(|p| p.exists()));
    files
        .iter()
        .flat_map(|p| fs::read_to_string(p).unwrap().lines().map(str::to_string).collect::<Vec<_>>())
        .collect()
}

fn assert_complete(path: &Path) {
    let lines = all_lines(path);
    assert_eq!(lines.len(), THREADS * WRITES);

    let expected: HashSet<String> = (0..THREADS)
        .flat_map(|t| (0..WRITES).map(move |m| payload(t, m).trim_end().to_string()))
        .collect();
    let seen: HashSet<String> = lines.into_iter().collect();
    assert_eq!(seen, expected, "payloads were torn, lost or duplicated");
    assert!(!backup_path(path, BACKUPS).exists(), "backup chain overflowed; raise BACKUPS");
}

fn policy() -> RotationPolicy {
    RotationPolicy::builder().max_bytes(512).backup_count(BACKUPS as i64).build().unwrap()
}

#[test]
fn threads_sharing_one_writer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.log");
    let writer = Arc::new(RotatingFileWriter::new(&path, policy()).unwrap());
    let start = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let writer = writer.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                for m in 0..WRITES {
                    writer.write(payload(t, m).as_bytes()).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    writer.close().unwrap();

    assert!(backup_path(&path, 1).exists());
    assert_complete(&path);
}

// Independent writers on one path behave like separate processes: they only
// share the `.lock` sibling.
#[test]
fn independent_writers_on_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("multi.log");
    let start = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let path = path.clone();
            let start = start.clone();
            thread::spawn(move || {
                let writer = RotatingFileWriter::new(&path, policy()).unwrap();
                start.wait();
                for m in 0..WRITES {
                    writer.write(payload(t, m).as_bytes()).unwrap();
                }
                writer.close().unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_complete(&path);
    // a rotated-out generation never reached the threshold
    for n in 1..BACKUPS {
        let p = backup_path(&path, n);
        if p.exists() {
            assert!(fs::metadata(&p).unwrap().len() < 512);
        }
    }
}
