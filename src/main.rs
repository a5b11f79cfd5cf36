use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use dicom_stack::parser::has_dicom_extension;
use dicom_stack::{ReaderConfig, ReaderError, RowOrder, VolumeReader};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RowOrderArg {
    FileNative,
    TopDown,
    BottomUp,
}

impl From<RowOrderArg> for RowOrder {
    fn from(arg: RowOrderArg) -> Self {
        match arg {
            RowOrderArg::FileNative => RowOrder::FileNative,
            RowOrderArg::TopDown => RowOrder::TopDown,
            RowOrderArg::BottomUp => RowOrder::BottomUp,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "dicom-stack",
    version,
    about = "Assembles DICOM files into a volume and reports its geometry",
    max_term_width = 80
)]
struct Cli {
    #[arg(required = true, help = "DICOM files, or directories of .dcm/.dc files")]
    inputs: Vec<PathBuf>,

    #[arg(long, help = "Stack ID to read, defaults to the first stack found")]
    stack: Option<String>,

    #[arg(long, help = "Read only this time step")]
    time: Option<usize>,

    #[arg(long, value_enum, default_value_t = RowOrderArg::BottomUp)]
    row_order: RowOrderArg,

    #[arg(long, help = "Keep the input order instead of sorting by position")]
    no_sort: bool,

    #[arg(long, help = "Keep the stored values of every slice")]
    no_rescale: bool,

    #[arg(
        long,
        num_args = 2,
        value_names = ["SLOPE", "INTERCEPT"],
        allow_negative_numbers = true,
        help = "Rescale all slices onto this slope and intercept"
    )]
    rescale_target: Option<Vec<f64>>,

    #[arg(long, help = "Keep YBR colour data as stored")]
    no_ybr_to_rgb: bool,

    #[arg(long, help = "Store time steps as voxel components")]
    time_as_vector: bool,

    #[arg(long, help = "Decode the volume and write the middle slice as PNG")]
    preview: Option<PathBuf>,
}

impl Cli {
    fn config(&self) -> ReaderConfig {
        let mut config = ReaderConfig::default()
            .with_sorting(!self.no_sort)
            .with_row_order(self.row_order.into())
            .with_auto_rescale(!self.no_rescale)
            .with_auto_ybr_to_rgb(!self.no_ybr_to_rgb)
            .with_time_as_vector(self.time_as_vector);
        if let Some(stack) = &self.stack {
            config = config.with_stack_id(stack.clone());
        }
        if let Some(time) = self.time {
            config = config.with_time_index(time);
        }
        if let Some([slope, intercept]) = self.rescale_target.as_deref() {
            config = config.with_rescale_target(*slope, *intercept);
        }
        config
    }
}

fn collect_files(inputs: &[PathBuf]) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = fs::read_dir(input)?
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.is_file() && has_dicom_extension(path))
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

fn run(cli: &Cli) -> Result<(), ReaderError> {
    let files = collect_files(&cli.inputs)?;
    let mut reader = VolumeReader::new(files, cli.config());

    let info = reader.update_information()?;
    let geometry = &info.geometry;
    let (times, slices, rows, columns, components) = geometry.dim();
    println!("stacks:       {:?}", info.stack_ids);
    println!("active stack: {}", info.active_stack.as_deref().unwrap_or("-"));
    println!("extent:       {columns} x {rows} x {slices}");
    println!(
        "time steps:   {} (spacing {})",
        geometry.time_steps, geometry.time_spacing
    );
    println!("array shape:  ({times}, {slices}, {rows}, {columns}, {components})");
    println!("scalar type:  {:?}", info.scalar_type);
    println!("photometric:  {}", info.photometric);
    println!("spacing:      {:?}", geometry.spacing);
    println!("origin:       {:?}", geometry.origin);
    println!("row order:    {}", geometry.row_order);
    println!(
        "rescale:      slope {} intercept {}{}",
        info.rescale.slope,
        info.rescale.intercept,
        if info.rescale.applied { " (applied)" } else { "" }
    );
    println!("patient matrix:{}", geometry.patient_matrix);

    if let Some(path) = &cli.preview {
        let volume = reader.read_data()?;
        write_preview(&volume, path)?;
    }
    Ok(())
}

fn write_preview(volume: &dicom_stack::Volume, path: &Path) -> Result<(), ReaderError> {
    let (_, slices, ..) = volume.dim();
    let image = volume
        .slice_image(0, slices / 2)
        .ok_or_else(|| ReaderError::Configuration("volume has no slices".into()))?;
    image
        .save(path)
        .map_err(|error| ReaderError::Configuration(format!("cannot write preview: {error}")))?;
    log::info!("wrote {}", path.display());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error ({} stage): {error}", error.stage());
            ExitCode::FAILURE
        }
    }
}
