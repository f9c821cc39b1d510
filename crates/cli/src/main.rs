//! FCPG CLI - flow accumulation and flow-conditioned parameter grids

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use fcpg_algorithms::hydrology::{
    accumulate_parameter, adjust_accumulation, convert_d8_format, d8_to_dinf, decay_accumulation,
    distance_to_stream, extreme_upslope, find_fac_pour_point, locate_pour_points, make_decay_grid,
    make_fac_weights, make_fcpg, mask_streams, sample_at, AccumulationBackend, AccumulationParams, D8Format,
    DecayFunction, DecayGridParams, ExternalBackend, Extreme, ExtremeUpslopeParams, FcpgParams, InProcess,
    InjectMode, InjectParams, PourPointParams, StreamNetworkParams, UpdateLedger, FAC_VARIABLE, FCPG_NODATA,
};
use fcpg_core::io::{read_geotiff, write_geotiff};
use fcpg_core::vector::BasinCollection;
use fcpg_core::{Raster, RasterElement};
use fcpg_parallel::{set_num_threads, TileGraph};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "fcpg")]
#[command(author, version, about = "Flow-conditioned parameter grids", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Worker threads for row-parallel steps (default: all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    /// Topological pass in this process
    InProcess,
    /// TauDEM aread8 under MPI
    Taudem,
}

#[derive(Args, Debug, Clone)]
struct BackendArgs {
    /// Accumulation backend
    #[arg(long, value_enum, default_value = "in-process")]
    backend: Backend,
    /// MPI processes for the taudem backend
    #[arg(long, default_value = "1")]
    cores: usize,
    /// MPI launcher for the taudem backend
    #[arg(long, default_value = "mpiexec")]
    mpi_call: String,
    /// Launcher flag preceding the process count
    #[arg(long, default_value = "-n", allow_hyphen_values = true)]
    mpi_arg: String,
    /// Leave each cell's own weight out of its total (headwaters hold 0)
    #[arg(long)]
    exclude_self: bool,
}

impl BackendArgs {
    fn backend(&self) -> Box<dyn AccumulationBackend> {
        match self.backend {
            Backend::InProcess => Box::new(InProcess),
            Backend::Taudem => Box::new(ExternalBackend {
                mpi_call: self.mpi_call.clone(),
                mpi_arg: self.mpi_arg.clone(),
                workers: self.cores,
                ..ExternalBackend::default()
            }),
        }
    }

    fn params(&self) -> AccumulationParams {
        AccumulationParams {
            include_self: !self.exclude_self,
            ..AccumulationParams::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Re-encode a D8 flow direction raster
    ConvertFdr {
        /// Input flow direction raster
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Input encoding: esri, taudem
        #[arg(long, default_value = "esri")]
        from: D8Format,
        /// Output encoding: esri, taudem
        #[arg(long, default_value = "taudem")]
        to: D8Format,
    },
    /// D8 codes (TauDEM) to D-infinity angles
    D8ToDinf {
        /// Input flow direction raster (TauDEM codes)
        input: PathBuf,
        /// Output file (radians counter-clockwise from east)
        output: PathBuf,
    },
    /// Accumulate a parameter grid, tracking its no-data cells
    Accumulate {
        /// Flow direction raster (TauDEM codes)
        fdr: PathBuf,
        /// Parameter raster
        param: PathBuf,
        /// Output accumulated parameter
        output: PathBuf,
        /// Also write the correction raster (1 missing, 0 present, -1 outside)
        #[arg(long)]
        correction: Option<PathBuf>,
        /// Also write the accumulated correction raster
        #[arg(long)]
        correction_accum: Option<PathBuf>,
        #[command(flatten)]
        backend: BackendArgs,
    },
    /// Flow accumulation (cells draining through each cell, itself included)
    Fac {
        /// Flow direction raster (TauDEM codes)
        fdr: PathBuf,
        /// Output file
        output: PathBuf,
        #[command(flatten)]
        backend: BackendArgs,
    },
    /// Mean upstream parameter value from accumulated grids
    Fcpg {
        /// Accumulated parameter raster
        param_accum: PathBuf,
        /// Flow accumulation raster
        area_accum: PathBuf,
        /// Output file
        output: PathBuf,
        /// Accumulated correction raster
        #[arg(long)]
        correction: Option<PathBuf>,
        /// Cells with a smaller effective upstream area become no-data
        #[arg(long)]
        min_accum: Option<f64>,
        /// Output no-data value
        #[arg(long, default_value_t = FCPG_NODATA, allow_hyphen_values = true)]
        nodata: f32,
    },
    /// Locate pour points into a downstream tile and record them in its ledger
    PourPoints {
        /// Flow accumulation raster of the upstream tile
        fac: PathBuf,
        /// Flow direction raster of the upstream tile
        fdr: PathBuf,
        /// Ledger of the downstream tile (created if absent)
        ledger: PathBuf,
        /// Upstream tile id (HUC4)
        #[arg(long)]
        from_tile: String,
        /// Downstream tile id (HUC4)
        #[arg(long)]
        to_tile: Option<String>,
        /// Basin polygons (JSON)
        #[arg(long)]
        basins: Option<PathBuf>,
        /// Clip buffer around each basin, map units
        #[arg(long, default_value = "50")]
        buffer: f64,
        /// Keep a basin's single maximum even when it does not drain off the tile
        #[arg(long)]
        keep_interior: bool,
    },
    /// Sample an accumulated raster at recorded pour points into the ledger
    LedgerUpdate {
        /// Ledger of the downstream tile
        ledger: PathBuf,
        /// Accumulated raster of the upstream tile
        raster: PathBuf,
        /// Upstream tile id
        #[arg(long)]
        upstream: String,
        /// Variable name to record
        #[arg(long)]
        variable: String,
    },
    /// Inject ledger values into a tile and re-accumulate it
    Adjust {
        /// Flow direction raster of the downstream tile
        fdr: PathBuf,
        /// Ledger of the downstream tile
        ledger: PathBuf,
        /// Output accumulation
        output: PathBuf,
        /// Ledger variable to inject
        #[arg(long, default_value = FAC_VARIABLE)]
        variable: String,
        /// Base weight raster (default: one per cell inside the basin)
        #[arg(long)]
        weight: Option<PathBuf>,
        /// replace or add
        #[arg(long, default_value = "replace")]
        mode: InjectMode,
        /// Step pour points one cell downstream first (non-overlapping tiles)
        #[arg(long)]
        move_downstream: bool,
        /// Only inject this upstream tile
        #[arg(long)]
        upstream: Option<String>,
        #[command(flatten)]
        backend: BackendArgs,
    },
    /// D8 flow distance to the nearest stream
    DistToStream {
        /// Flow direction raster (TauDEM codes)
        fdr: PathBuf,
        /// Flow accumulation raster
        fac: PathBuf,
        /// Output file
        output: PathBuf,
        /// Accumulation threshold for streams
        #[arg(long)]
        threshold: f64,
    },
    /// Decay multipliers from distance to stream
    DecayGrid {
        /// Distance-to-stream raster
        distance: PathBuf,
        /// Output file
        output: PathBuf,
        /// Decay constant (2 = moderate)
        #[arg(short, long, default_value = "2.0")]
        k: f64,
        /// exponential or inverse
        #[arg(long, default_value = "exponential")]
        function: DecayFunction,
    },
    /// D-infinity accumulation attenuated by a decay grid
    DecayAccumulate {
        /// D-infinity angle raster
        angles: PathBuf,
        /// Decay multiplier raster
        decay: PathBuf,
        /// Output file
        output: PathBuf,
        /// Weight raster (default: area)
        #[arg(long)]
        weight: Option<PathBuf>,
        /// Leave each cell's own weight out of its total
        #[arg(long)]
        exclude_self: bool,
    },
    /// Maximum or minimum parameter value upslope of each cell
    ExtremeUpslope {
        /// Flow direction raster (TauDEM codes)
        fdr: PathBuf,
        /// Parameter raster
        param: PathBuf,
        /// Output file
        output: PathBuf,
        /// max or min
        #[arg(long, default_value = "max")]
        extreme: Extreme,
        /// Flow accumulation raster for stream masking
        #[arg(long, requires = "threshold")]
        fac: Option<PathBuf>,
        /// Keep only cells at or above this accumulation
        #[arg(long, requires = "fac")]
        threshold: Option<f64>,
    },
    /// Set non-stream cells of a raster to no-data
    MaskStreams {
        /// Input raster
        input: PathBuf,
        /// Flow accumulation raster
        fac: PathBuf,
        /// Output file
        output: PathBuf,
        /// Accumulation threshold for streams
        #[arg(long)]
        threshold: f64,
    },
    /// Print tiles grouped in upstream-to-downstream waves
    Schedule {
        /// Edge list: `upstream downstream` per line
        #[arg(long, conflicts_with = "basins")]
        edges: Option<PathBuf>,
        /// Basin polygons (JSON) with downstream ids
        #[arg(long)]
        basins: Option<PathBuf>,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn read<T: RasterElement>(path: &Path) -> Result<Raster<T>> {
    info!("reading {}", path.display());
    let pb = spinner(&format!("Reading {}...", path.display()));
    let raster: Raster<T> =
        read_geotiff(path).with_context(|| format!("Failed to read {}", path.display()))?;
    pb.finish_and_clear();
    info!("  {} x {}", raster.cols(), raster.rows());
    Ok(raster)
}

fn write<T: RasterElement>(raster: &Raster<T>, path: &Path) -> Result<()> {
    let pb = spinner("Writing output...");
    write_geotiff(raster, path).with_context(|| format!("Failed to write {}", path.display()))?;
    pb.finish_and_clear();
    info!("wrote {}", path.display());
    Ok(())
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

fn load_basins(path: &Path) -> Result<BasinCollection> {
    BasinCollection::load(path).with_context(|| format!("Failed to read basins {}", path.display()))
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;
    if let Some(threads) = cli.threads {
        set_num_threads(threads);
    }

    match cli.command {
        Commands::Info { input } => {
            let raster: Raster<f64> = read(&input)?;
            let (rows, cols) = raster.shape();
            let bounds = raster.bounds();
            let stats = raster.statistics();

            println!("File: {}", input.display());
            println!("Dimensions: {} x {} ({} cells)", cols, rows, raster.len());
            println!("Cell size: {}", raster.cell_size());
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                bounds.0, bounds.1, bounds.2, bounds.3
            );
            match raster.crs() {
                Some(crs) => println!("CRS: {}", crs),
                None => println!("CRS: none"),
            }
            if let Some(nodata) = raster.nodata() {
                println!("NoData: {}", nodata);
            }
            println!("\nStatistics:");
            if let Some(min) = stats.min {
                println!("  Min: {:.4}", min);
            }
            if let Some(max) = stats.max {
                println!("  Max: {:.4}", max);
            }
            if let Some(mean) = stats.mean {
                println!("  Mean: {:.4}", mean);
            }
            println!(
                "  Valid cells: {} ({:.1}%)",
                stats.valid_count,
                100.0 * stats.valid_count as f64 / raster.len() as f64
            );
        }

        Commands::ConvertFdr {
            input,
            output,
            from,
            to,
        } => {
            let fdr: Raster<u8> = read(&input)?;
            let start = Instant::now();
            let result = convert_d8_format(&fdr, from, to).context("Failed to convert flow directions")?;
            let elapsed = start.elapsed();
            write(&result, &output)?;
            done("Flow direction", &output, elapsed);
        }

        Commands::D8ToDinf { input, output } => {
            let fdr: Raster<u8> = read(&input)?;
            let start = Instant::now();
            let result = d8_to_dinf(&fdr).context("Failed to convert to D-infinity")?;
            let elapsed = start.elapsed();
            write(&result, &output)?;
            done("D-infinity angles", &output, elapsed);
        }

        Commands::Accumulate {
            fdr,
            param,
            output,
            correction,
            correction_accum,
            backend,
        } => {
            let fdr: Raster<u8> = read(&fdr)?;
            let param: Raster<f64> = read(&param)?;
            let start = Instant::now();
            let result = accumulate_parameter(backend.backend().as_ref(), &fdr, &param, &backend.params())
                .context("Failed to accumulate parameter")?;
            let elapsed = start.elapsed();

            write(&result.accumulation, &output)?;
            match (&result.correction, correction, correction_accum) {
                (Some(corr), c, ca) => {
                    if let Some(path) = c {
                        write(&corr.raster, &path)?;
                    }
                    if let Some(path) = ca {
                        write(&corr.accumulation, &path)?;
                    }
                }
                (None, Some(_), _) | (None, _, Some(_)) => {
                    info!("no missing parameter cells; no correction raster written");
                }
                (None, None, None) => {}
            }
            println!("  Missing cells: {}", result.missing_cells);
            done("Parameter accumulation", &output, elapsed);
        }

        Commands::Fac {
            fdr,
            output,
            backend,
        } => {
            let fdr: Raster<u8> = read(&fdr)?;
            let start = Instant::now();
            let weights = make_fac_weights(&fdr);
            let result = backend
                .backend()
                .accumulate(&fdr, &weights, &backend.params())
                .context("Failed to accumulate flow")?;
            let elapsed = start.elapsed();
            write(&result, &output)?;
            done("Flow accumulation", &output, elapsed);
        }

        Commands::Fcpg {
            param_accum,
            area_accum,
            output,
            correction,
            min_accum,
            nodata,
        } => {
            let param_accum: Raster<f64> = read(&param_accum)?;
            let area_accum: Raster<f64> = read(&area_accum)?;
            let correction: Option<Raster<f64>> = correction.as_deref().map(read::<f64>).transpose()?;
            let start = Instant::now();
            let result = make_fcpg(
                &param_accum,
                &area_accum,
                correction.as_ref(),
                FcpgParams { min_accum, nodata },
            )
            .context("Failed to compute FCPG")?;
            let elapsed = start.elapsed();
            write(&result.raster, &output)?;
            println!("  Masked cells: {}", result.masked_cells);
            if result.negative_cells > 0 {
                println!("  Negative effective area: {} cells", result.negative_cells);
            }
            if result.zero_divisor_cells > 0 {
                println!("  Effective area of -1 (no-data): {} cells", result.zero_divisor_cells);
            }
            done("FCPG", &output, elapsed);
        }

        Commands::PourPoints {
            fac,
            fdr,
            ledger,
            from_tile,
            to_tile,
            basins,
            buffer,
            keep_interior,
        } => {
            let fac: Raster<f64> = read(&fac)?;
            let fdr: Raster<u8> = read(&fdr)?;
            let start = Instant::now();

            let points = match (basins, to_tile) {
                (Some(path), Some(to_tile)) => {
                    let basins = load_basins(&path)?;
                    let selected = basins.select_pour_basins(&from_tile, &to_tile);
                    locate_pour_points(
                        &fac,
                        &fdr,
                        &selected,
                        PourPointParams {
                            buffer,
                            keep_interior_maximum: keep_interior,
                        },
                    )
                    .context("Failed to locate pour points")?
                }
                (None, _) => {
                    info!("no basins given; using the accumulation maximum");
                    find_fac_pour_point(&fac, &fdr, &from_tile)
                        .context("Failed to locate pour point")?
                        .into_iter()
                        .collect()
                }
                (Some(_), None) => anyhow::bail!("--basins needs --to-tile"),
            };

            let mut book = UpdateLedger::load_or_default(&ledger)
                .with_context(|| format!("Failed to read ledger {}", ledger.display()))?;
            book.record_pour_points(&from_tile, &points)
                .context("Failed to record pour points")?;
            book.save(&ledger)
                .with_context(|| format!("Failed to write ledger {}", ledger.display()))?;
            let elapsed = start.elapsed();

            for p in &points {
                println!("  ({:.3}, {:.3}) = {} [fdr {}]", p.x, p.y, p.value, p.fdr);
            }
            done(&format!("{} pour points", points.len()), &ledger, elapsed);
        }

        Commands::LedgerUpdate {
            ledger,
            raster,
            upstream,
            variable,
        } => {
            let mut book = UpdateLedger::load(&ledger)
                .with_context(|| format!("Failed to read ledger {}", ledger.display()))?;
            let entry = book
                .entry(&upstream)
                .with_context(|| format!("No pour points recorded for {}", upstream))?;
            let (xs, ys) = (entry.x.clone(), entry.y.clone());
            let raster: Raster<f64> = read(&raster)?;
            let start = Instant::now();

            let sampled = sample_at(&raster, &xs, &ys);
            let missing = sampled.iter().filter(|v| v.is_none()).count();
            if missing > 0 {
                anyhow::bail!("{} of {} pour points have no value in the raster", missing, sampled.len());
            }
            let values: Vec<f64> = sampled.into_iter().flatten().collect();
            book.update(&upstream, &variable, values)
                .context("Failed to update ledger")?;
            book.save(&ledger)
                .with_context(|| format!("Failed to write ledger {}", ledger.display()))?;
            done(&format!("Ledger variable {}", variable), &ledger, start.elapsed());
        }

        Commands::Adjust {
            fdr,
            ledger,
            output,
            variable,
            weight,
            mode,
            move_downstream,
            upstream,
            backend,
        } => {
            let fdr: Raster<u8> = read(&fdr)?;
            let book = UpdateLedger::load(&ledger)
                .with_context(|| format!("Failed to read ledger {}", ledger.display()))?;
            let base: Raster<f64> = match weight {
                Some(path) => read(&path)?,
                None => make_fac_weights(&fdr),
            };
            let start = Instant::now();
            let params = InjectParams {
                mode,
                move_downstream,
                upstream,
            };
            let result = adjust_accumulation(
                backend.backend().as_ref(),
                &fdr,
                &base,
                &book,
                &variable,
                &params,
                &backend.params(),
            )
            .context("Failed to adjust accumulation")?;
            let elapsed = start.elapsed();
            write(&result.accumulation, &output)?;
            println!(
                "  Injected: {}, skipped: {}, entries without {}: {}, rejected: {}",
                result.report.injected,
                result.report.skipped,
                variable,
                result.report.missing,
                result.report.rejected
            );
            done("Adjusted accumulation", &output, elapsed);
        }

        Commands::DistToStream {
            fdr,
            fac,
            output,
            threshold,
        } => {
            let fdr: Raster<u8> = read(&fdr)?;
            let fac: Raster<f64> = read(&fac)?;
            let start = Instant::now();
            let result = distance_to_stream(&fdr, &fac, StreamNetworkParams { threshold })
                .context("Failed to compute distance to stream")?;
            let elapsed = start.elapsed();
            write(&result, &output)?;
            done("Distance to stream", &output, elapsed);
        }

        Commands::DecayGrid {
            distance,
            output,
            k,
            function,
        } => {
            let distance: Raster<f64> = read(&distance)?;
            let start = Instant::now();
            let result = make_decay_grid(&distance, DecayGridParams { k, function })
                .context("Failed to build decay grid")?;
            let elapsed = start.elapsed();
            write(&result, &output)?;
            done("Decay grid", &output, elapsed);
        }

        Commands::DecayAccumulate {
            angles,
            decay,
            output,
            weight,
            exclude_self,
        } => {
            let angles: Raster<f64> = read(&angles)?;
            let decay: Raster<f64> = read(&decay)?;
            let weight: Option<Raster<f64>> = weight.as_deref().map(read::<f64>).transpose()?;
            let start = Instant::now();
            let params = AccumulationParams {
                include_self: !exclude_self,
                ..AccumulationParams::default()
            };
            let result = decay_accumulation(&angles, &decay, weight.as_ref(), &params)
                .context("Failed to compute decayed accumulation")?;
            let elapsed = start.elapsed();
            write(&result, &output)?;
            done("Decayed accumulation", &output, elapsed);
        }

        Commands::ExtremeUpslope {
            fdr,
            param,
            output,
            extreme,
            fac,
            threshold,
        } => {
            let fdr: Raster<u8> = read(&fdr)?;
            let param: Raster<f64> = read(&param)?;
            let fac: Option<Raster<f64>> = fac.as_deref().map(read::<f64>).transpose()?;
            let start = Instant::now();
            let params = ExtremeUpslopeParams {
                extreme,
                stream_threshold: threshold,
            };
            let result = extreme_upslope(&fdr, &param, fac.as_ref(), params)
                .context("Failed to compute extreme upslope value")?;
            let elapsed = start.elapsed();
            write(&result, &output)?;
            done("Extreme upslope value", &output, elapsed);
        }

        Commands::MaskStreams {
            input,
            fac,
            output,
            threshold,
        } => {
            let raster: Raster<f64> = read(&input)?;
            let fac: Raster<f64> = read(&fac)?;
            let start = Instant::now();
            let result = mask_streams(&raster, &fac, StreamNetworkParams { threshold })
                .context("Failed to mask streams")?;
            let elapsed = start.elapsed();
            write(&result, &output)?;
            done("Stream mask", &output, elapsed);
        }

        Commands::Schedule { edges, basins } => {
            let graph = match (edges, basins) {
                (Some(path), _) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    TileGraph::from_edge_list(&text).context("Failed to parse edge list")?
                }
                (None, Some(path)) => TileGraph::from_basins(&load_basins(&path)?),
                (None, None) => anyhow::bail!("give --edges or --basins"),
            };
            if graph.is_empty() {
                warn!("no tiles to schedule");
            }
            let waves = graph.waves().context("Failed to order tiles")?;
            for (i, wave) in waves.iter().enumerate() {
                println!("wave {}: {}", i + 1, wave.join(" "));
            }
        }
    }

    Ok(())
}
