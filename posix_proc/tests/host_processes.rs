//! End-to-end tests against real processes on the host

#![cfg(unix)]

use std::fs::{self, File};
use std::thread;
use std::time::Duration;

use posix_proc::{
    ChildSpec, HostNative, ProcError, ProcessControl, SpawnMode, SpawnOutcome, WaitOptions,
    WaitTarget, SIGKILL,
};

fn control(capacity: usize) -> ProcessControl<HostNative> {
    ProcessControl::new(HostNative::new(Duration::from_millis(2)), capacity)
}

#[test]
fn exit_code_round_trip() {
    let control = control(4);
    let pid = control.create_child(ChildSpec::command("exit 7")).unwrap().pid();

    let reaped = control
        .wait(WaitTarget::Pid(pid), WaitOptions::empty())
        .unwrap()
        .unwrap();
    assert_eq!(reaped.pid, pid);
    assert!(reaped.status.exited());
    assert_eq!(reaped.status.exit_code(), 7);

    let err = control.wait(WaitTarget::Pid(pid), WaitOptions::empty()).unwrap_err();
    assert!(matches!(err, ProcError::NotFound(p) if p == pid));
}

#[test]
fn kill_running_child() {
    let control = control(4);
    let pid = control.create_child(ChildSpec::command("sleep 5")).unwrap().pid();

    assert_eq!(control.wait(WaitTarget::Any, WaitOptions::NOHANG).unwrap(), None);

    // Probing leaves the child alone.
    control.signal(pid, 0).unwrap();
    assert_eq!(control.wait(WaitTarget::Pid(pid), WaitOptions::NOHANG).unwrap(), None);

    control.signal(pid, SIGKILL).unwrap();
    let reaped = control
        .wait(WaitTarget::Pid(pid), WaitOptions::empty())
        .unwrap()
        .unwrap();
    assert_eq!(reaped.status.term_signal(), Some(SIGKILL));

    assert!(control.signal(pid, SIGKILL).is_err());
}

#[test]
fn capacity_is_enforced() {
    let control = control(2);
    let first = control.create_child(ChildSpec::command("sleep 5")).unwrap().pid();
    let second = control.create_child(ChildSpec::command("sleep 5")).unwrap().pid();
    assert_ne!(first, second);

    let err = control.create_child(ChildSpec::command("sleep 5")).unwrap_err();
    assert!(matches!(err, ProcError::ResourceExhausted { capacity: 2 }));

    for pid in [first, second] {
        control.signal(pid, SIGKILL).unwrap();
        control.wait(WaitTarget::Pid(pid), WaitOptions::empty()).unwrap();
    }
    assert_eq!(control.table().live_count(), 0);
    assert!(control.create_child(ChildSpec::command("exit 0")).is_ok());
}

#[test]
fn any_child_without_children() {
    let control = control(1);
    let err = control.wait(WaitTarget::Any, WaitOptions::empty()).unwrap_err();
    assert!(matches!(err, ProcError::NotFound(-1)));
}

#[test]
fn spawn_wait_and_overlay_modes() {
    let control = control(2);

    match control.create_process(ChildSpec::command("exit 3"), SpawnMode::Wait).unwrap() {
        SpawnOutcome::Completed(reaped) => assert_eq!(reaped.status.exit_code(), 3),
        other => panic!("unexpected {:?}", other),
    }

    match control.create_process(ChildSpec::command("exit 5"), SpawnMode::Overlay).unwrap() {
        SpawnOutcome::ProcessWillBeReplaced(replaced) => assert_eq!(replaced.exit_code(), 5),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(control.table().live_count(), 0);
}

#[test]
fn explicit_program_with_arguments() {
    let control = control(1);
    let spec = ChildSpec::command("sh -c \"exit 4\"").program("/bin/sh");
    let pid = control.create_child(spec).unwrap().pid();

    let reaped = control
        .wait(WaitTarget::Pid(pid), WaitOptions::empty())
        .unwrap()
        .unwrap();
    assert_eq!(reaped.status.exit_code(), 4);
}

#[test]
fn missing_program_frees_slot() {
    let control = control(1);
    let err = control
        .create_child(ChildSpec::new().program("/nonexistent/posix-proc-missing"))
        .unwrap_err();
    assert!(matches!(err, ProcError::CreationFailed(_)));
    assert_eq!(control.table().live_count(), 0);
    assert!(control.create_child(ChildSpec::command("exit 0")).is_ok());
}

#[test]
fn redirected_stdout() {
    let path = std::env::temp_dir().join(format!("posix-proc-stdout-{}", std::process::id()));
    let control = control(1);
    let file = File::create(&path).unwrap();

    let pid = control
        .create_child(ChildSpec::command("echo hello").stdout(file))
        .unwrap()
        .pid();
    control.wait(WaitTarget::Pid(pid), WaitOptions::empty()).unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
    fs::remove_file(&path).unwrap();
}

#[test]
fn concurrent_waiters_reap_once() {
    let control = control(1);
    let pid = control.create_child(ChildSpec::command("sleep 0.2")).unwrap().pid();

    let results: Vec<_> = thread::scope(|s| {
        let waiters: Vec<_> = (0..2)
            .map(|_| s.spawn(|| control.wait(WaitTarget::Pid(pid), WaitOptions::empty())))
            .collect();
        waiters.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let reaped = results.iter().filter(|r| matches!(r, Ok(Some(_)))).count();
    let lost = results
        .iter()
        .filter(|r| matches!(r, Err(ProcError::NotFound(_))))
        .count();
    assert_eq!((reaped, lost), (1, 1));
}

#[test]
fn any_waiter_alongside_specific_waiter() {
    let control = control(2);
    let first = control.create_child(ChildSpec::command("sleep 0.2")).unwrap().pid();
    let second = control.create_child(ChildSpec::command("sleep 0.4")).unwrap().pid();

    let (specific, any) = thread::scope(|s| {
        let specific = s.spawn(|| control.wait(WaitTarget::Pid(first), WaitOptions::empty()));
        let any = s.spawn(|| control.wait(WaitTarget::Any, WaitOptions::empty()));
        (specific.join().unwrap(), any.join().unwrap())
    });

    let mut reaped = vec![any.unwrap().unwrap().pid];
    match specific {
        Ok(Some(r)) => reaped.push(r.pid),
        Err(ProcError::NotFound(pid)) => assert_eq!(pid, first),
        other => panic!("unexpected {:?}", other),
    }
    while let Ok(Some(r)) = control.wait(WaitTarget::Any, WaitOptions::empty()) {
        reaped.push(r.pid);
    }

    reaped.sort();
    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(reaped, expected);
    assert_eq!(control.table().live_count(), 0);
}

#[test]
fn creation_alongside_any_waiter() {
    let control = control(4);

    let (mut created, mut reaped) = thread::scope(|s| {
        let creator = s.spawn(|| {
            (0..4)
                .map(|code| {
                    let spec = ChildSpec::command(format!("exit {}", code));
                    control.create_child(spec).unwrap().pid()
                })
                .collect::<Vec<_>>()
        });
        let waiter = s.spawn(|| {
            let mut reaped = Vec::new();
            while reaped.len() < 4 {
                match control.wait(WaitTarget::Any, WaitOptions::NOHANG) {
                    Ok(Some(r)) => reaped.push(r.pid),
                    Ok(None) | Err(ProcError::NotFound(-1)) => thread::sleep(Duration::from_millis(1)),
                    Err(e) => panic!("unexpected {:?}", e),
                }
            }
            reaped
        });
        (creator.join().unwrap(), waiter.join().unwrap())
    });

    created.sort();
    reaped.sort();
    assert_eq!(created, reaped);
    assert_eq!(control.table().live_count(), 0);
}

#[test]
fn identity_queries() {
    let control = control(1);
    assert_eq!(control.parent_id() as u32, std::os::unix::process::parent_id());

    let exe = std::env::current_exe().unwrap();
    assert_eq!(control.own_executable_path(), exe.to_string_lossy());
    assert_eq!(
        control.own_executable_name(),
        exe.file_name().unwrap().to_string_lossy()
    );
}
