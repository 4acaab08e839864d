use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

const HI_MD5: &str = "49f68a5c8493ec2c0bf489821c21fc3b";
const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

fn ftk(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ftk").unwrap();
    cmd.current_dir(dir).arg("--color").arg("never").env_remove("FTK_LOG").env_remove("FTK_JOBS");
    cmd
}

fn read_tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            let rel = entry.path().strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
            out.push((rel, fs::read(entry.path()).unwrap()));
        }
    }
    out
}

#[test]
fn hash_then_verify() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("a.txt"), "hi")?;
    fs::write(dir.path().join("b.txt"), "")?;

    ftk(dir.path()).args(["hash", "--type", "md5", "-w"]).assert().success();

    let manifest = fs::read_to_string(dir.path().join("checksum.md5"))?;
    let mut lines = manifest.lines();
    assert!(lines.next().unwrap().starts_with("#md5#"));
    let mut body: Vec<&str> = lines.collect();
    body.sort();
    assert_eq!(body, vec![format!("{}\t\"a.txt\"", HI_MD5), format!("{}\t\"b.txt\"", EMPTY_MD5)]);

    ftk(dir.path())
        .args(["check", "checksum.md5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed: 2/2 passed"));
    Ok(())
}

#[test]
fn verifier_detects_tampering() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("a.txt"), "hi")?;
    fs::write(dir.path().join("b.txt"), "")?;
    ftk(dir.path()).args(["hash", "-w"]).assert().success();

    fs::write(dir.path().join("a.txt"), "bye")?;
    let output = ftk(dir.path()).args(["check", "checksum.md5"]).assert().failure().get_output().stdout.clone();
    let text = String::from_utf8(output)?;

    let failures: Vec<&str> = text.lines().filter(|l| l.starts_with("FAILED")).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("a.txt"));
    assert!(failures[0].contains(&format!("expected ...{}", &HI_MD5[24..])));
    assert!(text.contains("completed: 1/2 passed"));
    Ok(())
}

#[test]
fn find_with_size_and_type() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("small.txt"), vec![b'x'; 10])?;
    fs::write(dir.path().join("big.bin"), vec![0u8; 2 * 1024 * 1024])?;

    ftk(dir.path()).args(["find", "--type", "f", "--size", "+1M"]).assert().success().stdout("big.bin\n");

    ftk(dir.path())
        .args(["find", "--type", "f", "--size", "+1M", "--count"])
        .assert()
        .success()
        .stdout("found: 1\n");

    for workers in ["4", "auto"] {
        ftk(dir.path())
            .args(["find", "--type", "f", "--size", "+1M", "-x", workers])
            .assert()
            .success()
            .stdout("big.bin\n");
    }
    Ok(())
}

#[cfg(unix)]
#[test]
fn find_survives_symlink_loops() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    std::os::unix::fs::symlink("loop", dir.path().join("loop"))?;
    fs::write(dir.path().join("file.txt"), "x")?;

    for follow in [false, true] {
        let mut cmd = ftk(dir.path());
        cmd.arg("find").timeout(Duration::from_secs(20));
        if follow {
            cmd.arg("-L");
        }
        let out = cmd.output()?;
        let text = String::from_utf8(out.stdout)?;
        assert_eq!(text.lines().filter(|l| l.ends_with("loop")).count(), 1, "follow={}", follow);
        assert!(text.contains("file.txt"));
    }
    Ok(())
}

#[test]
fn check_fails_when_nothing_verifies() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("a.txt"), "hi")?;
    fs::write(dir.path().join("bad.md5"), format!("#md5#2024-01-01 10:00:00\n{}\t\"../a.txt\"\n", HI_MD5))?;
    ftk(dir.path())
        .args(["check", "bad.md5"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("skipped 1 malformed line(s)"));
    Ok(())
}

#[test]
fn manifest_outside_the_tree_still_verifies() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::create_dir_all(dir.path().join("data/nested"))?;
    fs::create_dir(dir.path().join("work"))?;
    fs::write(dir.path().join("data/a.txt"), "hi")?;
    fs::write(dir.path().join("data/nested/b.txt"), "")?;
    let work = dir.path().join("work");

    ftk(&work).args(["hash", "-r", "-w", "../data"]).assert().success();
    ftk(&work)
        .args(["check", "checksum.md5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed: 2/2 passed"));

    ftk(dir.path()).args(["hash", "-r", "-o", "work/sub.md5", "data"]).assert().success();
    ftk(dir.path())
        .args(["check", "work/sub.md5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed: 2/2 passed"));

    ftk(dir.path()).args(["hash", "-r", "--local", "-w", "data"]).assert().success();
    ftk(&work)
        .args(["check", "../checksum.md5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed: 2/2 passed"));
    ftk(dir.path()).args(["hash", "--local", "data/a.txt", "data/nested/b.txt"]).assert().failure();
    Ok(())
}

#[test]
fn move_refuses_self_descent() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::create_dir_all(dir.path().join("src/child"))?;
    fs::write(dir.path().join("src/keep.rs"), "fn main() {}")?;

    ftk(dir.path())
        .args(["find", "--name", "src", "--word", "--mv", "src/child"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot move into subdirectory"));

    assert!(dir.path().join("src/keep.rs").exists());
    assert!(!dir.path().join("src/child/src").exists());
    Ok(())
}

#[test]
fn archive_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let tree = dir.path().join("tree");
    fs::create_dir_all(tree.join("nested/deeper"))?;
    fs::write(tree.join("file1.txt"), "Hello, this is the first file.\n")?;
    fs::write(tree.join("nested/file2.log"), "Some log data here.\n")?;
    fs::write(tree.join("nested/deeper/data.dat"), [0u8, 1, 2, 3, 4, 5])?;

    ftk(dir.path())
        .args(["pack", "out.tar.gz", "tree"])
        .assert()
        .success()
        .stdout(predicate::str::contains("packed"));
    ftk(dir.path()).args(["unpack", "out.tar.gz", "restored"]).assert().success();

    assert_eq!(read_tree(&tree), read_tree(&dir.path().join("restored")));

    ftk(dir.path())
        .args(["preview", "out.tar.gz", "--table-style", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nested/file2.log").and(predicate::str::contains("entries")));
    Ok(())
}

#[test]
fn pack_refuses_to_clobber_and_preview_emits_json() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("notes.txt"), "notes")?;
    ftk(dir.path()).args(["pack", "n.zip", "notes.txt"]).assert().success();
    ftk(dir.path()).args(["pack", "n.zip", "notes.txt"]).assert().failure().stderr(predicate::str::contains("--overwrite"));
    ftk(dir.path()).args(["pack", "n.zip", "notes.txt", "--overwrite"]).assert().success();

    let out = ftk(dir.path()).args(["preview", "n.zip", "--json"]).output()?;
    let entries: serde_json::Value = serde_json::from_slice(&out.stdout)?;
    assert_eq!(entries[0]["name"], "notes.txt");
    assert_eq!(entries[0]["kind"], "file");
    assert_eq!(entries[0]["size"], 5);
    Ok(())
}

#[test]
fn unknown_archive_extension_fails() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a"), "a").unwrap();
    ftk(dir.path()).args(["pack", "a.rar", "a"]).assert().failure().stderr(predicate::str::contains("unsupported"));
}

#[test]
fn diff_reports_changes_between_trees() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    for (root, body) in [("left", "one"), ("right", "two")] {
        fs::create_dir(dir.path().join(root))?;
        fs::write(dir.path().join(root).join("same.txt"), "same")?;
        fs::write(dir.path().join(root).join("changed.txt"), body)?;
    }
    ftk(dir.path())
        .args(["diff", "left", "right"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("DIFFERS").and(predicate::str::contains("completed: 1/2 identical")));

    fs::write(dir.path().join("right/changed.txt"), "one")?;
    ftk(dir.path()).args(["diff", "left", "right"]).assert().success();
    Ok(())
}

#[test]
fn size_and_list() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::create_dir(dir.path().join("d"))?;
    fs::write(dir.path().join("d/one"), vec![0u8; 100])?;
    fs::write(dir.path().join("d/two"), vec![0u8; 50])?;

    ftk(dir.path()).args(["size", "--raw", "d"]).assert().success().stdout("150\td\n");
    ftk(dir.path()).args(["list", "d"]).assert().success().stdout(predicate::str::contains("one").and(predicate::str::contains("two")));
    ftk(dir.path())
        .args(["list", "-l", "--ts", "plain", "d"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Perm").and(predicate::str::contains("100")));
    Ok(())
}

#[cfg(unix)]
#[test]
fn watch_runs_a_bounded_number_of_times() {
    let dir = tempdir().unwrap();
    ftk(dir.path())
        .args(["watch", "-n", "0", "--count", "2", "--", "echo", "tick"])
        .timeout(Duration::from_secs(20))
        .assert()
        .success()
        .stdout(predicate::str::contains("tick").count(4));
}
