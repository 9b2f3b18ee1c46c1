use clap::{Parser, Subcommand};
use datapak::{
    ChecksumKind, CompMethod, Header, HeaderExt, IndexExt, OsExt, ReadOptions, Reader, Writer,
};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "datapak")]
#[command(about = "The .dpk container format CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack files into a new archive
    Pack {
        #[arg(short, long)]
        output: PathBuf,
        inputs: Vec<PathBuf>,
        #[arg(short, long, default_value = "zstd")]
        method: String,
        #[arg(short, long, default_value_t = 3)]
        level: u8,
        #[arg(short, long, default_value = "crc32")]
        checksum: String,
        /// Compress each file independently (enables random access)
        #[arg(long)]
        per_file: bool,
        /// Dictionary file for the zstd+dict method
        #[arg(long)]
        dictionary: Option<PathBuf>,
    },
    /// Extract every entry into a directory
    Unpack {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        /// Skip per-file checksum verification
        #[arg(long)]
        no_verify: bool,
    },
    /// List entries with sizes and digests
    List { input: PathBuf },
    /// Print archive header details
    Info { input: PathBuf },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            if matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) {
                e.exit();
            }
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Pack {
            output,
            inputs,
            method,
            level,
            checksum,
            per_file,
            dictionary,
        } => {
            let method = CompMethod::parse(&method)
                .ok_or_else(|| format!("unknown compression method {method:?}"))?;
            let checksum = ChecksumKind::parse(&checksum)
                .ok_or_else(|| format!("unknown hash {checksum:?}"))?;
            if inputs.is_empty() {
                return Err("no input files given".into());
            }

            let mut header_exts = Vec::new();
            if let Some(dict) = dictionary {
                header_exts.push(HeaderExt::DictionaryFile(
                    dict.to_string_lossy().into_owned(),
                ));
            }

            let header = Header::new(method, level, checksum, per_file);
            let mut writer = Writer::create(&output, header, header_exts)?;
            for input in &inputs {
                let name = input
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| format!("{} has no file name", input.display()))?;
                let meta = fs::metadata(input)?;
                #[allow(unused_mut)]
                let mut exts = vec![IndexExt::Os(OsExt::from_metadata(input, &meta))];
                #[cfg(unix)]
                exts.push(IndexExt::Posix(datapak::PosixExt::from_metadata(&meta)));

                let entry = writer.add_file(input, &name, exts)?;
                println!("added {} ({} bytes)", entry.name(), entry.uncomp_size);
            }
            writer.finalize()?;
            println!("wrote {}", output.display());
        }
        Commands::Unpack {
            input,
            output_dir,
            no_verify,
        } => {
            let opts = ReadOptions {
                check_file_checksums: !no_verify,
                ..ReadOptions::default()
            };
            let mut reader = Reader::open_with(&input, opts)?;
            fs::create_dir_all(&output_dir)?;
            while let Some(entry) = reader.peek_index() {
                let name = entry.name();
                let data = reader.next_bytes()?;
                let out_path = safe_join(&output_dir, &name)?;
                if let Some(parent) = out_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&out_path, &data)?;
                println!("unpacked {name}");
            }
        }
        Commands::List { input } => {
            let reader = Reader::open(&input)?;
            let checksum = reader.header().flags.checksum;
            println!(
                "{:<32} {:>12} {:>12}  {:<10} {}",
                "Name", "Size", "Stored", "Modified", checksum.name()
            );
            for (i, entry) in reader.entries().iter().enumerate() {
                let modified = reader
                    .index_extensions(i)
                    .and_then(|exts| {
                        exts.iter().find_map(|e| match e {
                            IndexExt::Os(os) => Some(os.modified),
                            _ => None,
                        })
                    })
                    .and_then(|secs| chrono::DateTime::from_timestamp(secs as i64, 0))
                    .map(|t| t.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{:<32} {:>12} {:>12}  {:<10} {}",
                    entry.name(),
                    entry.uncomp_size,
                    entry.comp_size,
                    modified,
                    hex::encode(entry.digest(checksum)),
                );
            }
        }
        Commands::Info { input } => {
            let reader = Reader::open(&input)?;
            let header = reader.header();
            println!("--- .dpk archive ---");
            println!("Method:        {}", header.comp_method.name());
            println!("Level:         {}", header.flags.comp_level);
            println!("Checksum:      {}", header.flags.checksum.name());
            println!("Entries:       {}", header.num_of_indexes);
            println!("Index size:    {}", header.index_size);
            println!("Ext area:      {}", header.ext_field_size);
            println!("Random access: {}", reader.random_access());
        }
    }
    Ok(())
}

/// Join an archive entry name onto the destination, refusing absolute paths
/// and parent-directory traversal.
fn safe_join(dir: &Path, name: &str) -> Result<PathBuf, String> {
    let rel = Path::new(name);
    if rel.is_absolute()
        || rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(format!("refusing to unpack suspicious path {name:?}"));
    }
    Ok(dir.join(rel))
}
