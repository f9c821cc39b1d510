//! Accumulation delegated to TauDEM's `aread8`
//!
//! The flow direction and weight grids are written to a scratch directory,
//! `aread8 -p <fdr> -ad8 <out> -wg <weight> -nc` runs under MPI, and the
//! result is read back. A non-zero exit status aborts the operation; no
//! output raster is produced.

use super::flow_accumulation::{AccumulationBackend, AccumulationParams};
use super::flow_direction::{is_inside, TAUDEM_NODATA};
use fcpg_core::io::{read_geotiff, write_geotiff};
use fcpg_core::raster::Raster;
use fcpg_core::{Error, Result};
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// External TauDEM accumulation backend
#[derive(Debug, Clone)]
pub struct ExternalBackend {
    /// MPI launcher, e.g. `mpiexec`. Empty runs `program` directly.
    pub mpi_call: String,
    /// Launcher argument preceding the worker count
    pub mpi_arg: String,
    /// Number of MPI processes
    pub workers: usize,
    /// TauDEM accumulation executable
    pub program: String,
}

impl Default for ExternalBackend {
    fn default() -> Self {
        Self {
            mpi_call: "mpiexec".to_string(),
            mpi_arg: "-n".to_string(),
            workers: 1,
            program: "aread8".to_string(),
        }
    }
}

impl ExternalBackend {
    fn command(&self, fdr: &Path, weight: &Path, out: &Path) -> Command {
        let mut cmd = if self.mpi_call.is_empty() {
            Command::new(&self.program)
        } else {
            let mut cmd = Command::new(&self.mpi_call);
            cmd.arg(&self.mpi_arg)
                .arg(self.workers.to_string())
                .arg(&self.program);
            cmd
        };
        cmd.arg("-p")
            .arg(fdr)
            .arg("-ad8")
            .arg(out)
            .arg("-wg")
            .arg(weight)
            .arg("-nc");
        cmd
    }
}

fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|s| s.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

impl AccumulationBackend for ExternalBackend {
    fn name(&self) -> &str {
        &self.program
    }

    fn accumulate(
        &self,
        fdr: &Raster<u8>,
        weight: &Raster<f64>,
        params: &AccumulationParams,
    ) -> Result<Raster<f64>> {
        fdr.check_aligned(weight)?;
        let fdr_nodata = fdr.nodata();

        let scratch = tempfile::tempdir()?;
        let fdr_path = scratch.path().join("fdr.tif");
        let weight_path = scratch.path().join("weight.tif");
        let out_path = scratch.path().join("accum.tif");

        let mut taudem_fdr = fdr.clone();
        taudem_fdr.set_nodata(Some(fdr_nodata.unwrap_or(TAUDEM_NODATA)));
        write_geotiff(&taudem_fdr, &fdr_path)?;

        // Missing weights contribute nothing, as in-process
        let nodata = weight.nodata();
        let mut zeroed = weight.map(Some(f64::NAN), |w| {
            if w.is_nan() || Some(w) == nodata {
                0.0
            } else {
                w
            }
        });
        for (out, &code) in zeroed.data_mut().iter_mut().zip(fdr.data().iter()) {
            if !is_inside(code, fdr_nodata) {
                *out = f64::NAN;
            }
        }
        write_geotiff(&zeroed, &weight_path)?;

        let mut cmd = self.command(&fdr_path, &weight_path, &out_path);
        let command = describe(&cmd);
        info!("running {}", command);

        let status = cmd.status().map_err(|e| Error::ExternalProcess {
            command: command.clone(),
            status: format!("failed to start: {}", e),
        })?;
        if !status.success() {
            return Err(Error::ExternalProcess {
                command,
                status: status.to_string(),
            });
        }

        let raw: Raster<f64> = read_geotiff(&out_path)?;
        if raw.shape() != fdr.shape() {
            let (er, ec) = fdr.shape();
            let (ar, ac) = raw.shape();
            return Err(Error::SizeMismatch { er, ec, ar, ac });
        }
        debug!("read {} output", self.program);

        // aread8 totals include each cell's own weight
        let mut output = fdr.with_same_meta::<f64>(fdr.rows(), fdr.cols());
        output.set_nodata(Some(params.nodata));
        for (((out, &total), &code), &w) in output
            .data_mut()
            .iter_mut()
            .zip(raw.data().iter())
            .zip(fdr.data().iter())
            .zip(zeroed.data().iter())
        {
            *out = if !is_inside(code, fdr_nodata) || raw.is_nodata(total) {
                params.nodata
            } else if params.include_self {
                total
            } else {
                total - w
            };
        }
        Ok(output)
    }
}
