use clap::{Parser, ValueEnum};

const AFTER_HELP: &str = r#"
Message types may be combined in a comma-separated list, e.g.
--msgtype scm,scm+,idm. The special value "all" selects scm, scm+,
idm and r900.

Every flag may also be set through an environment variable named
RTLAMR_<FLAG> (uppercase). The variable applies only when the flag is
absent from the command line.

Start an rtl_tcp server first:

    rtl_tcp -a 127.0.0.1 -p 1234
"#;

// Symbol lengths the receive chain has been validated against. Other
// values are accepted but warned about.
const VALID_SYMBOL_LENGTHS: [usize; 3 + 70] = {
    let mut v = [0usize; 73];
    v[0] = 7;
    v[1] = 8;
    v[2] = 9;
    let mut i = 0;
    while i < 70 {
        v[3 + i] = 28 + i;
        i += 1;
    }
    v
};

/// Output encoding
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Plain,
    Csv,
    Json,
    Xml,
}

/// Top-level program arguments
#[derive(Parser, Clone, Debug)]
#[command(version)]
#[command(about = "Receive and decode ERT utility meter telemetry from an rtl_tcp server")]
#[command(after_help = AFTER_HELP)]
#[command(max_term_width = 100)]
pub struct Args {
    /// Verbosity level (-vvv for more)
    #[arg(short, long, default_value_t = 0, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress state information at startup
    #[arg(short, long, env = "RTLAMR_QUIET")]
    pub quiet: bool,

    /// Address or hostname of the rtl_tcp instance
    #[arg(long, default_value = "127.0.0.1:1234", env = "RTLAMR_SERVER")]
    pub server: String,

    /// Message types to receive: scm, scm+, idm, netidm, r900, r900bcd or all
    #[arg(long, default_value = "scm", value_delimiter = ',', env = "RTLAMR_MSGTYPE")]
    pub msgtype: Vec<String>,

    /// Symbol length in samples
    #[arg(long, default_value_t = 72, env = "RTLAMR_SYMBOLLENGTH")]
    pub symbollength: usize,

    /// Display only messages matching an id in the comma-separated list
    #[arg(long, value_delimiter = ',', env = "RTLAMR_FILTERID")]
    pub filterid: Vec<u32>,

    /// Display only messages matching a type in the comma-separated list
    #[arg(long, value_delimiter = ',', env = "RTLAMR_FILTERTYPE")]
    pub filtertype: Vec<u8>,

    /// Suppress duplicate messages from each meter
    #[arg(long, env = "RTLAMR_UNIQUE")]
    pub unique: bool,

    /// One-shot execution: exit after the first message. With
    /// --filterid, wait for exactly one message from each listed meter
    #[arg(long, env = "RTLAMR_SINGLE")]
    pub single: bool,

    /// Time to run for in seconds, 0 for infinite
    #[arg(long, default_value_t = 0.0, env = "RTLAMR_DURATION")]
    pub duration: f64,

    /// Log output format
    #[arg(long, value_enum, default_value_t = Format::Plain, env = "RTLAMR_FORMAT")]
    pub format: Format,

    /// Dump the raw signal of decoded messages to this file
    #[arg(long, env = "RTLAMR_SAMPLEFILE")]
    pub samplefile: Option<String>,

    /// Center frequency to receive on (Hz); overrides the protocol default
    #[arg(long, env = "RTLAMR_CENTERFREQ")]
    pub centerfreq: Option<u32>,

    /// Sample rate (Hz); overrides the derived rate
    #[arg(long, env = "RTLAMR_SAMPLERATE")]
    pub samplerate: Option<u32>,

    /// Tuner gain mode: true for manual, false for auto
    #[arg(long, num_args = 0..=1, default_missing_value = "true", env = "RTLAMR_TUNERGAINMODE")]
    pub tunergainmode: Option<bool>,

    /// Tuner gain in dB
    #[arg(long, env = "RTLAMR_TUNERGAIN")]
    pub tunergain: Option<f64>,

    /// Frequency correction in ppm
    #[arg(long, env = "RTLAMR_FREQCORRECTION")]
    pub freqcorrection: Option<i32>,

    /// Enable/disable the RTL AGC
    #[arg(long, num_args = 0..=1, default_missing_value = "true", env = "RTLAMR_AGCMODE")]
    pub agcmode: Option<bool>,

    /// Select tuner gain by index, must be below the reported gain count
    #[arg(long, env = "RTLAMR_GAINBYINDEX")]
    pub gainbyindex: Option<u32>,

    /// Enable/disable test mode
    #[arg(long, num_args = 0..=1, default_missing_value = "true", env = "RTLAMR_TESTMODE")]
    pub testmode: Option<bool>,

    /// Enable/disable direct sampling
    #[arg(long, num_args = 0..=1, default_missing_value = "true", env = "RTLAMR_DIRECTSAMPLING")]
    pub directsampling: Option<bool>,

    /// Enable/disable offset tuning
    #[arg(long, num_args = 0..=1, default_missing_value = "true", env = "RTLAMR_OFFSETTUNING")]
    pub offsettuning: Option<bool>,

    /// Set the RTL crystal frequency (Hz)
    #[arg(long, env = "RTLAMR_RTLXTALFREQ")]
    pub rtlxtalfreq: Option<u32>,

    /// Set the tuner crystal frequency (Hz)
    #[arg(long, env = "RTLAMR_TUNERXTALFREQ")]
    pub tunerxtalfreq: Option<u32>,
}

impl Args {
    /// Message types with the "all" shorthand expanded
    pub fn message_types(&self) -> Vec<String> {
        if self.msgtype.len() == 1 && self.msgtype[0] == "all" {
            return ["scm", "scm+", "idm", "r900"]
                .iter()
                .map(|s| s.to_string())
                .collect();
        }
        self.msgtype.clone()
    }

    /// Was any gain-related flag given?
    ///
    /// When none is, the tuner is put in automatic gain mode.
    pub fn gain_flag_set(&self) -> bool {
        self.tunergainmode.is_some()
            || self.tunergain.is_some()
            || self.agcmode.is_some()
            || self.gainbyindex.is_some()
    }

    /// Is the configured symbol length one the chain is validated for?
    pub fn symbol_length_valid(&self) -> bool {
        VALID_SYMBOL_LENGTHS.contains(&self.symbollength)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clap() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["ertdec"]).unwrap();
        assert_eq!(args.server, "127.0.0.1:1234");
        assert_eq!(args.msgtype, vec!["scm"]);
        assert_eq!(args.symbollength, 72);
        assert_eq!(args.format, Format::Plain);
        assert!(!args.gain_flag_set());
        assert!(args.symbol_length_valid());
    }

    #[test]
    fn test_msgtype_list_and_all() {
        let args = Args::try_parse_from(["ertdec", "--msgtype", "scm,idm"]).unwrap();
        assert_eq!(args.message_types(), vec!["scm", "idm"]);

        let args = Args::try_parse_from(["ertdec", "--msgtype", "all"]).unwrap();
        assert_eq!(args.message_types(), vec!["scm", "scm+", "idm", "r900"]);
    }

    #[test]
    fn test_filter_lists() {
        let args =
            Args::try_parse_from(["ertdec", "--filterid", "123,456", "--filtertype", "4,12"])
                .unwrap();
        assert_eq!(args.filterid, vec![123, 456]);
        assert_eq!(args.filtertype, vec![4, 12]);
    }

    #[test]
    fn test_gain_flags() {
        let args = Args::try_parse_from(["ertdec", "--tunergain", "49.6"]).unwrap();
        assert!(args.gain_flag_set());

        let args = Args::try_parse_from(["ertdec", "--agcmode"]).unwrap();
        assert_eq!(args.agcmode, Some(true));

        let args = Args::try_parse_from(["ertdec", "--agcmode", "false"]).unwrap();
        assert_eq!(args.agcmode, Some(false));
    }

    #[test]
    fn test_symbol_length_validation() {
        let args = Args::try_parse_from(["ertdec", "--symbollength", "57"]).unwrap();
        assert!(args.symbol_length_valid());
        let args = Args::try_parse_from(["ertdec", "--symbollength", "10"]).unwrap();
        assert!(!args.symbol_length_valid());
    }

    #[test]
    fn test_env_override() {
        // No other test reads RTLAMR_DURATION, so this cannot race
        // with concurrently running parsers.
        std::env::set_var("RTLAMR_DURATION", "5.5");

        // The variable applies when the flag is absent...
        let args = Args::try_parse_from(["ertdec"]).unwrap();
        assert_eq!(args.duration, 5.5);

        // ...and loses when it is given.
        let args = Args::try_parse_from(["ertdec", "--duration", "9"]).unwrap();
        assert_eq!(args.duration, 9.0);

        std::env::remove_var("RTLAMR_DURATION");
    }
}
