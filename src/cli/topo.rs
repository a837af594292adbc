// TOPOLOGY PRINTER -- DETECTS THE HOST CACHE HIERARCHY AND PRINTS THE
// SCHEDULING-DOMAIN LEVELS IT WOULD PRODUCE

use anyhow::Result;

use bedlam::topology::{detect_host, synthetic, Topology, DOMAIN_CACHE};

pub fn run_topo() -> Result<()> {
    let nr_cores = {
        let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if n < 1 { 1 } else { n as usize }
    };

    let (chains, source) = match detect_host(nr_cores) {
        Ok(chains) => (chains, "host sysfs"),
        Err(_) => (synthetic(nr_cores, &[2, 4]), "synthetic fallback"),
    };
    let topo = Topology::build(nr_cores, &chains)?;

    println!("BEDLAM TOPOLOGY ({} cores, {})", nr_cores, source);
    println!();
    for level in 0..topo.nr_levels() {
        print!("level {}: ", level);
        for &id in topo.level(level) {
            let d = topo.domain(id);
            let tag = if d.flags & DOMAIN_CACHE != 0 { "cache" } else { "-" };
            print!("[{} {}]", d.cores, tag);
        }
        println!();
    }
    if topo.nr_levels() == 0 {
        println!("(flat: no domains on a unicore machine)");
    }
    Ok(())
}
