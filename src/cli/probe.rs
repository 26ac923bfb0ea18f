use std::path::Path;

use anyhow::Result;

use utilgov::topology::{SlackOptions, Topology};
use utilgov::tuning;

fn governor_of(root: &Path, id: usize) -> String {
    std::fs::read_to_string(root.join("cpufreq").join(format!("policy{}", id)).join("scaling_governor"))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

pub fn run_probe(root: &Path) -> Result<()> {
    let topo = Topology::detect(root, &SlackOptions::default())?;

    println!("UTILGOV TOPOLOGY PROBE");
    println!("CPUS:     {}", topo.nr_cpus());
    println!("POLICIES: {}", topo.policies.len());
    println!();

    for p in &topo.policies {
        let cpus: Vec<String> = p.cpus.iter().map(|c| c.to_string()).collect();
        let (up, down) = p
            .transition_delay_us
            .unwrap_or_else(|| tuning::default_rate_limits_us(p.transition_latency_ns));

        println!("POLICY {} ({})", p.id, governor_of(root, p.id));
        println!("  CPUS:        {}", cpus.join(","));
        println!("  HARDWARE:    {} - {} kHz", p.cpuinfo_min_khz, p.cpuinfo_max_khz);
        println!("  LIMITS:      {} - {} kHz", p.min_khz, p.max_khz);
        println!("  CURRENT:     {} kHz", p.cur_khz);
        println!("  LATENCY:     {} ns", p.transition_latency_ns);
        println!("  RATE LIMITS: UP={}us DOWN={}us", up, down);
        println!("  TIPPING:     {} kHz AT FULL UTILIZATION", tuning::tipping_point(p.cpuinfo_max_khz));
        let freqs: Vec<String> = p.frequencies.iter().map(|f| f.to_string()).collect();
        println!("  TABLE ({}):  {}", freqs.len(), freqs.join(" "));
        println!();
    }

    let offline: Vec<String> = topo
        .cores
        .iter()
        .filter(|c| !c.online)
        .map(|c| c.cpu.to_string())
        .collect();
    if !offline.is_empty() {
        println!("OFFLINE CPUS: {}", offline.join(","));
    }
    Ok(())
}
