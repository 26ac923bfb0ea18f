use std::path::Path;

use anyhow::Result;

use utilgov::source::{ProcStatSource, PROC_STAT};
use utilgov::topology::{SlackOptions, Topology};

const USERSPACE: &str = "userspace";

fn check_policy(root: &Path, id: usize) -> bool {
    let dir = root.join("cpufreq").join(format!("policy{}", id));
    let mut ok = true;

    let governors = std::fs::read_to_string(dir.join("scaling_available_governors")).unwrap_or_default();
    if governors.split_whitespace().any(|g| g == USERSPACE) {
        println!("  policy{:<17}userspace OK", id);
    } else {
        println!("  policy{:<17}userspace MISSING ({})", id, governors.trim());
        ok = false;
    }

    if dir.join("scaling_setspeed").exists() {
        println!("  policy{:<17}scaling_setspeed OK", id);
    } else {
        println!("  policy{:<17}scaling_setspeed MISSING", id);
        ok = false;
    }
    ok
}

pub fn run_check(root: &Path) -> Result<()> {
    println!("UTILGOV DEPENDENCY CHECK");
    println!();

    let mut ok = true;

    println!("CPUFREQ SYSFS:");
    match Topology::detect(root, &SlackOptions::default()) {
        Ok(topo) if !topo.policies.is_empty() => {
            println!("  {:<24}OK ({} policies, {} cpus)", root.display(), topo.policies.len(), topo.nr_cpus());
            for p in &topo.policies {
                if !check_policy(root, p.id) {
                    ok = false;
                }
            }
        }
        Ok(_) => {
            println!("  {:<24}NO POLICIES", root.display());
            ok = false;
        }
        Err(e) => {
            println!("  {:<24}UNREADABLE ({})", root.display(), e);
            ok = false;
        }
    }
    println!();

    println!("UTILIZATION:");
    let stat = ProcStatSource::new(Path::new(PROC_STAT), 0)
        .and_then(|s| s.refresh(0, 1));
    match stat {
        Ok(_) => println!("  {:<24}OK", PROC_STAT),
        Err(e) => {
            println!("  {:<24}FAILED ({})", PROC_STAT, e);
            ok = false;
        }
    }
    println!();

    // SAFETY: geteuid HAS NO PRECONDITIONS
    let root_user = unsafe { libc::geteuid() } == 0;
    if root_user {
        println!("  {:<24}OK", "root");
    } else {
        println!("  {:<24}NOT ROOT (use --dry-run or sudo)", "root");
        ok = false;
    }
    println!();

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        if !root_user {
            println!("  Writing scaling_setspeed requires root");
        }
        std::process::exit(1);
    }

    Ok(())
}
