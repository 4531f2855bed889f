use clap::Parser;

use crate::install::{DEFAULT_SEGMENT_SIZE, DEFAULT_WINDOW_SEGMENTS};

#[derive(Parser, Debug)]
#[command(name = "rnsp")]
#[command(version)]
#[command(about = "Stream-install NSP content from files or HTTP URLs", long_about = None)]
#[command(after_help = "Examples:\n  \
  rnsp -l https://example.com/title.nsp          list entries in a remote NSP\n  \
  rnsp https://example.com/title.nsp -d out/     install every entry into out/\n  \
  rnsp title.nsp -c 0123456789abcdef0123456789abcdef   install one content by id")]
pub struct Cli {
    /// NSP file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Entry names to install (default: all)
    #[arg(value_name = "ENTRIES")]
    pub entries: Vec<String>,

    /// List entries (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Install the content with this 32-hex-char id
    #[arg(short = 'c', long = "content-id", value_name = "HEX")]
    pub content_id: Option<String>,

    /// Directory to install content into
    #[arg(short = 'd', value_name = "DIR")]
    pub output_dir: Option<String>,

    /// Placeholder write granularity in bytes
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_SEGMENT_SIZE)]
    pub segment_size: u64,

    /// Backpressure window, in segments
    #[arg(long, value_name = "N", default_value_t = DEFAULT_WINDOW_SEGMENTS)]
    pub window_segments: u64,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }
}
