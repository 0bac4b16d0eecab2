//! Output encoders
//!
//! One encoder per `--format` value. All of them emit exactly one
//! line per message; JSON and XML carry no root wrapper so the output
//! can be consumed as a stream.

use std::io::{self, Write};

use chrono::SecondsFormat;
use ertrx::{LogMessage, Message};

use crate::cli::Format;

/// Writes log messages to an output stream
pub trait Encoder {
    fn encode(&mut self, msg: &LogMessage) -> io::Result<()>;
}

/// Build the encoder for the selected format
///
/// `with_offset` controls whether plain output carries the sample
/// file offset and length fields; it is only meaningful when samples
/// are dumped.
pub fn new_encoder(
    format: Format,
    writer: Box<dyn Write + Send>,
    with_offset: bool,
) -> Box<dyn Encoder> {
    match format {
        Format::Plain => Box::new(PlainEncoder {
            writer,
            with_offset,
        }),
        Format::Csv => Box::new(CsvEncoder { writer }),
        Format::Json => Box::new(JsonEncoder { writer }),
        Format::Xml => Box::new(XmlEncoder { writer }),
    }
}

struct PlainEncoder {
    writer: Box<dyn Write + Send>,
    with_offset: bool,
}

impl Encoder for PlainEncoder {
    fn encode(&mut self, msg: &LogMessage) -> io::Result<()> {
        writeln!(self.writer, "{}", msg.plain(self.with_offset))
    }
}

struct CsvEncoder {
    writer: Box<dyn Write + Send>,
}

impl Encoder for CsvEncoder {
    fn encode(&mut self, msg: &LogMessage) -> io::Result<()> {
        let mut record = vec![
            msg.time.to_rfc3339_opts(SecondsFormat::Nanos, true),
            msg.offset.to_string(),
            msg.length.to_string(),
        ];
        record.extend(msg.message.fields().into_iter().map(|(_, value)| value));
        writeln!(self.writer, "{}", record.join(","))
    }
}

struct JsonEncoder {
    writer: Box<dyn Write + Send>,
}

impl Encoder for JsonEncoder {
    fn encode(&mut self, msg: &LogMessage) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, msg)?;
        writeln!(self.writer)
    }
}

struct XmlEncoder {
    writer: Box<dyn Write + Send>,
}

impl Encoder for XmlEncoder {
    fn encode(&mut self, msg: &LogMessage) -> io::Result<()> {
        let name = element_name(&msg.message);

        write!(
            self.writer,
            "<LogMessage Time=\"{}\" Offset=\"{}\" Length=\"{}\" Type=\"{}\"><{}",
            msg.time.to_rfc3339_opts(SecondsFormat::Nanos, true),
            msg.offset,
            msg.length,
            escape(msg.message.msg_type()),
            name
        )?;
        for (field, value) in msg.message.fields() {
            write!(self.writer, " {}=\"{}\"", field, escape(&value))?;
        }
        writeln!(self.writer, "></{}></LogMessage>", name)
    }
}

// Element names must be valid XML; "SCM+" maps to its record name.
fn element_name(msg: &Message) -> &'static str {
    match msg {
        Message::Scm(_) | Message::ScmPlus(_) => "SCM",
        Message::Idm(_) => "IDM",
        Message::NetIdm(_) => "NetIDM",
        Message::R900(_) => "R900",
        Message::R900Bcd(_) => "R900BCD",
    }
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
