/*! invismark command line driver.

Operates on raw interleaved BGR24 frame files (one byte per channel, no
header), the same way raw sample files move through an SDR toolchain. A
PNG round trip on the host side is one `ffmpeg`/`magick` call away:

```text
$ magick photo.png -depth 8 bgr:photo.bgr
$ invismark embed -i photo.bgr --width 1024 --height 768 \
      --text "who owns this" -o marked.bgr
$ invismark verify -i marked.bgr --width 1024 --height 768
```

Reports are printed as JSON on stdout; `-v`/`-vv` turns on stderr logging.
*/
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;

use invismark::carrier::CarrierKind;
use invismark::raster::ImageBgr;
use invismark::sync::SyncTemplate;
use invismark::watermark::{Config, Watermarker};

#[derive(clap::Parser, Debug)]
#[command(version, about)]
struct Opt {
    #[arg(short, long, action = clap::ArgAction::Count, help = "Verbosity; repeat for more")]
    verbose: u8,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(clap::Subcommand, Debug)]
enum Cmd {
    /// Embed a text payload into an image.
    Embed {
        #[arg(short, long, help = "Input raw BGR24 file")]
        input: PathBuf,
        #[arg(long)]
        width: usize,
        #[arg(long)]
        height: usize,
        #[arg(short, long, help = "Message to embed")]
        text: String,
        #[arg(short, long, default_value_t = 1.0, help = "Embedding strength")]
        alpha: f64,
        #[arg(short, long, help = "Watermarked output file")]
        output: PathBuf,
        #[arg(long, help = "Also write the signal heatmap here")]
        signal_map: Option<PathBuf>,
        #[arg(long, help = "Use the DCT-pair carrier instead of DWT-QIM")]
        dct: bool,
        #[arg(long, help = "Plant the DFT sync template for blind geometry recovery")]
        sync: bool,
    },
    /// Recover a payload using the original image as reference.
    Extract {
        #[arg(long, help = "Original raw BGR24 file")]
        original: PathBuf,
        #[arg(long, help = "Suspect raw BGR24 file")]
        suspect: PathBuf,
        #[arg(long)]
        width: usize,
        #[arg(long)]
        height: usize,
        #[arg(long, help = "Suspect width when it differs from the original")]
        suspect_width: Option<usize>,
        #[arg(long, help = "Suspect height when it differs from the original")]
        suspect_height: Option<usize>,
    },
    /// Blind verification: no reference image.
    Verify {
        #[arg(short, long, help = "Suspect raw BGR24 file")]
        input: PathBuf,
        #[arg(long)]
        width: usize,
        #[arg(long)]
        height: usize,
    },
}

fn read_bgr(path: &PathBuf, width: usize, height: usize) -> Result<ImageBgr> {
    let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let want = width * height * 3;
    if data.len() != want {
        bail!(
            "{}: {} bytes, but {width}x{height} BGR24 needs {want}",
            path.display(),
            data.len()
        );
    }
    Ok(ImageBgr::from_vec(width, height, data))
}

fn write_bgr(path: &PathBuf, image: &ImageBgr) -> Result<()> {
    fs::write(path, image.as_bytes()).with_context(|| format!("writing {}", path.display()))
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("invismark")
        .quiet(false)
        .verbosity(opt.verbose as usize + 1)
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    match opt.cmd {
        Cmd::Embed {
            input,
            width,
            height,
            text,
            alpha,
            output,
            signal_map,
            dct,
            sync,
        } => {
            let cfg = Config {
                carrier: if dct {
                    CarrierKind::DctPair
                } else {
                    CarrierKind::DwtQim
                },
                embed_sync: sync,
                sync: SyncTemplate::default(),
                signal_map: signal_map.is_some(),
                ..Config::default()
            };
            let wm = Watermarker::new(cfg)?;
            let image = read_bgr(&input, width, height)?;
            let out = wm.embed(&image, &text, alpha)?;
            write_bgr(&output, &out.image)?;
            if let (Some(path), Some(map)) = (&signal_map, &out.signal_map) {
                write_bgr(path, map)?;
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Cmd::Extract {
            original,
            suspect,
            width,
            height,
            suspect_width,
            suspect_height,
        } => {
            let wm = Watermarker::new(Config::default())?;
            let orig = read_bgr(&original, width, height)?;
            let susp = read_bgr(
                &suspect,
                suspect_width.unwrap_or(width),
                suspect_height.unwrap_or(height),
            )?;
            let out = wm.extract(&orig, &susp)?;
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Cmd::Verify {
            input,
            width,
            height,
        } => {
            let wm = Watermarker::new(Config::default())?;
            let image = read_bgr(&input, width, height)?;
            let out = wm.verify(&image)?;
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}
