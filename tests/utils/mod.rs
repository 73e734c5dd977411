// Integration Test Utilities
//
// Builds one measurement pass (pcm-power, pcm-memory, turbostat, pqos) in a
// temporary directory. Every source samples every 0.5s; each pass starts on
// its own wall clock, as the tools never run concurrently.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wattrib::config::SourcePaths;

pub const INTERVAL_MS: u64 = 500;

/// `HH:MM:SS.mmm` for `start_sec` plus `k` intervals
pub fn clock(start_sec: u64, k: usize) -> String {
    let ms = start_sec * 1000 + k as u64 * INTERVAL_MS;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        ms / 3_600_000,
        (ms / 60_000) % 60,
        (ms / 1000) % 60,
        ms % 1000
    )
}

pub struct Pass {
    pub dir: TempDir,
    pub prefix: PathBuf,
}

impl Pass {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("id_1");
        Self { dir, prefix }
    }

    /// A complete pass of `n` samples: pkg 40 W, DRAM 8 W, cpu_share 0.5,
    /// W=100, A=400, S=500 MB/s
    pub fn standard(n: usize) -> Self {
        let pass = Self::new();
        pass.write_power(&vec![(40.0, 8.0); n]);
        pass.write_memory(&vec![500.0; n]);
        pass.write_turbostat(&vec![Some(50.0); n]);
        pass.write_pqos(&vec![(100.0, 300.0); n]);
        pass
    }

    pub fn paths(&self) -> SourcePaths {
        SourcePaths::from_prefix(&self.prefix)
    }

    pub fn file(&self, suffix: &str) -> PathBuf {
        let mut name = self.prefix.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }

    pub fn power_path(&self) -> PathBuf {
        self.file("_pcm_power.csv")
    }

    pub fn attrib_path(&self) -> PathBuf {
        self.file("_attrib.csv")
    }

    /// pcm-power table; pcm ends every line with a delimiter
    pub fn write_power(&self, rows: &[(f64, f64)]) {
        let mut text = String::from("System,System,S0,S0,S0,\nDate,Time,Frequency,Watts,DRAM Watts,\n");
        for (k, (pkg, dram)) in rows.iter().enumerate() {
            text.push_str(&format!(
                "2024-03-05,{},2400,{pkg:.3},{dram:.3},\n",
                clock(36_000, k)
            ));
        }
        self.write(&self.power_path(), &text);
    }

    /// pcm-power table without a DRAM domain
    pub fn write_power_without_dram(&self, pkg: &[f64]) {
        let mut text = String::from("System,System,S0\nDate,Time,Watts\n");
        for (k, watts) in pkg.iter().enumerate() {
            text.push_str(&format!("2024-03-05,{},{watts:.3}\n", clock(36_000, k)));
        }
        self.write(&self.power_path(), &text);
    }

    /// pcm-memory table with two warm-up rows ahead of `values`
    pub fn write_memory(&self, values: &[f64]) {
        let mut text = String::from(
            ",,SKT0,SKT0,System,System\nDate,Time,Mem Read (MB/s),Memory (MB/s),Read,Memory (MB/s)\n",
        );
        let warmup = [900_000.0, 900_000.0];
        for (k, value) in warmup.iter().chain(values).enumerate() {
            text.push_str(&format!(
                "2024-03-05,{},1.0,{value:.1},1.0,{value:.1}\n",
                clock(39_599, k)
            ));
        }
        self.write(&self.file("_pcm_memory_dram.csv"), &text);
    }

    /// turbostat log; `None` leaves that interval's block out
    pub fn write_turbostat(&self, busy: &[Option<f64>]) {
        let mut text = String::new();
        for (k, busy) in busy.iter().enumerate() {
            let Some(busy) = busy else { continue };
            let tod = 1_709_650_800.0 + k as f64 * 0.5;
            text.push_str("Time_Of_Day_Seconds\tCPU\tBusy%\tBzy_MHz\n");
            text.push_str(&format!("{tod:.3}\t-\t20.00\t2000\n"));
            text.push_str(&format!("{tod:.3}\t0\t{busy:.2}\t3000\n"));
            text.push_str(&format!("{tod:.3}\t1\t5.00\t1200\n"));
        }
        self.write(&self.file("_turbostat.txt"), &text);
    }

    /// pqos table: workload group on core 0, everything else on cores 1-3
    pub fn write_pqos(&self, rows: &[(f64, f64)]) {
        let mut text = String::from("Time,Core,IPC,LLC Misses,LLC[KB],MBL[MB/s],MBR[MB/s],MBT[MB/s]\n");
        for (k, (workload, others)) in rows.iter().enumerate() {
            let time = format!("2024-03-05 {}", clock(43_200, k));
            text.push_str(&format!(
                "{time},\"0\",1.2,1000,512.0,{workload:.1},0.0,{workload:.1}\n"
            ));
            text.push_str(&format!(
                "{time},\"1-3\",0.8,3000,2048.0,{others:.1},0.0,{others:.1}\n"
            ));
        }
        self.write(&self.file("_pqos.csv"), &text);
    }

    pub fn remove(&self, suffix: &str) {
        fs::remove_file(self.file(suffix)).unwrap();
    }

    pub fn write(&self, path: &Path, text: &str) {
        fs::write(path, text).unwrap();
    }

    pub fn read(&self, path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }
}

/// Parse the attribution table into (header, rows of numbers)
pub fn attribution_rows(text: &str) -> (Vec<String>, Vec<Vec<f64>>) {
    let mut lines = text.lines();
    let header = lines
        .next()
        .unwrap()
        .split(',')
        .map(str::to_string)
        .collect();
    let rows = lines
        .map(|line| line.split(',').map(|c| c.parse::<f64>().unwrap()).collect())
        .collect();
    (header, rows)
}

/// Column index in the attribution table
pub fn col(header: &[String], name: &str) -> usize {
    header.iter().position(|h| h == name).unwrap()
}
