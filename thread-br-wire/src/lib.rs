//! DNS-SD / mDNS message composition helpers.
//!
//! This crate provides the small set of `domain`-crate building blocks the
//! rest of the agent needs to assemble and parse DNS-SD / mDNS messages: a
//! way to build `domain::base::Name`s from a slice of `&str` labels without
//! an allocation per name, a `TXT` record type built from key/value pairs,
//! a way to chain together heterogeneous record data types, and a growable
//! octet buffer that the `domain` traits can target directly.

use core::cmp::Ordering;
use core::fmt::{self, Display};
use core::ops::RangeBounds;

use domain::base::header::Flags;
use domain::base::iana::{Opcode, Rcode};
use domain::base::message::ShortMessage;
use domain::base::message_builder::PushError;
use domain::base::name::{FromStrError, Label, ToLabelIter};
use domain::base::rdata::ComposeRecordData;
use domain::base::wire::{Composer, ParseError};
use domain::base::{MessageBuilder, Record, RecordData, Rtype, ToName};
use domain::dep::octseq::{FreezeBuilder, FromBuilder, Octets, OctetsBuilder, ShortBuf, Truncate};
use domain::rdata::AllRecordData;

/// The DNS-SD owner name (`_services._dns-sd._udp.local.`), shared by every
/// PTR record that enumerates the service types advertised on this host.
pub const DNS_SD_OWNER: Labels = Labels::new(&["_services", "_dns-sd", "_udp", "local"]);

/// Errors raised while composing or parsing a DNS-SD / mDNS message.
#[derive(Debug)]
pub enum WireError {
    ShortBuf,
    InvalidMessage,
}

impl Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortBuf => write!(f, "ShortBuf"),
            Self::InvalidMessage => write!(f, "InvalidMessage"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<ShortBuf> for WireError {
    fn from(_: ShortBuf) -> Self {
        Self::ShortBuf
    }
}

impl From<PushError> for WireError {
    fn from(_: PushError) -> Self {
        Self::ShortBuf
    }
}

impl From<FromStrError> for WireError {
    fn from(_: FromStrError) -> Self {
        Self::InvalidMessage
    }
}

impl From<ShortMessage> for WireError {
    fn from(_: ShortMessage) -> Self {
        Self::InvalidMessage
    }
}

impl From<ParseError> for WireError {
    fn from(_: ParseError) -> Self {
        Self::InvalidMessage
    }
}

/// Builds a `domain` lib `Name` on the fly from a slice of `&str` labels,
/// without needing a dot-joined owned `String`.
///
/// Callers typically build the label slice on the stack right at the call
/// site (`&[instance_name, "_meshcop", "_udp", "local", ""]`), borrowing from
/// whatever owned strings they hold — no per-record allocation is needed.
#[derive(Debug, Clone, Copy)]
pub struct Labels<'a>(&'a [&'a str]);

impl<'a> Labels<'a> {
    pub const fn new(labels: &'a [&'a str]) -> Self {
        Self(labels)
    }
}

impl<'a> fmt::Display for Labels<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for label in self.0 {
            write!(f, "{}.", label)?;
        }

        Ok(())
    }
}

impl<'a> ToName for Labels<'a> {}

/// An iterator over the labels in a [`Labels`] instance, terminated by the
/// root label.
#[derive(Clone)]
pub struct LabelsIter<'a> {
    name: &'a Labels<'a>,
    index: usize,
}

impl<'a> Iterator for LabelsIter<'a> {
    type Item = &'a Label;

    fn next(&mut self) -> Option<Self::Item> {
        match self.index.cmp(&self.name.0.len()) {
            Ordering::Less => {
                let label = Label::from_slice(self.name.0[self.index].as_bytes()).unwrap();
                self.index += 1;
                Some(label)
            }
            Ordering::Equal => {
                let label = Label::root();
                self.index += 1;
                Some(label)
            }
            Ordering::Greater => None,
        }
    }
}

impl<'a> DoubleEndedIterator for LabelsIter<'a> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.index > 0 {
            self.index -= 1;
            if self.index == self.name.0.len() {
                Some(Label::root())
            } else {
                Some(Label::from_slice(self.name.0[self.index].as_bytes()).unwrap())
            }
        } else {
            None
        }
    }
}

impl<'a> ToLabelIter for Labels<'a> {
    type LabelIter<'t>
        = LabelsIter<'t>
    where
        Self: 't;

    fn iter_labels(&self) -> Self::LabelIter<'_> {
        LabelsIter {
            name: self,
            index: 0,
        }
    }
}

/// A `TXT` record built from a slice of key/value `&str` pairs, as per the
/// DNS-SD `TXT` record format (one length-prefixed `key=value` string per
/// pair, or a single zero-length string when empty).
#[derive(Debug, Clone)]
pub struct Txt<'a>(&'a [(&'a str, &'a str)]);

impl<'a> Txt<'a> {
    pub const fn new(txt: &'a [(&'a str, &'a str)]) -> Self {
        Self(txt)
    }
}

impl<'a> fmt::Display for Txt<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txt [")?;

        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }

            write!(f, "{}={}", k, v)?;
        }

        write!(f, "]")
    }
}

impl<'a> RecordData for Txt<'a> {
    fn rtype(&self) -> Rtype {
        Rtype::TXT
    }
}

impl<'a> ComposeRecordData for Txt<'a> {
    fn rdlen(&self, _compress: bool) -> Option<u16> {
        None
    }

    fn compose_rdata<Target: Composer + ?Sized>(
        &self,
        target: &mut Target,
    ) -> Result<(), Target::AppendError> {
        if self.0.is_empty() {
            target.append_slice(&[0])?;
        } else {
            for (k, v) in self.0 {
                // Thread TXT keys/values are bounded well under 254 bytes by the
                // MeshCoP / SRP registration paths that feed this type.
                target.append_slice(&[(k.len() + v.len() + 1) as u8])?;
                target.append_slice(k.as_bytes())?;
                target.append_slice(&[b'='])?;
                target.append_slice(v.as_bytes())?;
            }
        }

        Ok(())
    }

    fn compose_canonical_rdata<Target: Composer + ?Sized>(
        &self,
        target: &mut Target,
    ) -> Result<(), Target::AppendError> {
        self.compose_rdata(target)
    }
}

/// Chains together two record data types, so a fixed custom type (like
/// [`Txt`]) can sit in the same answer stream as `domain`'s own
/// [`AllRecordData`].
#[derive(Debug, Clone)]
pub enum RecordDataChain<T, U> {
    This(T),
    Next(U),
}

impl<T, U> fmt::Display for RecordDataChain<T, U>
where
    T: fmt::Display,
    U: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::This(data) => write!(f, "{}", data),
            Self::Next(data) => write!(f, "{}", data),
        }
    }
}

impl<T, U> RecordData for RecordDataChain<T, U>
where
    T: RecordData,
    U: RecordData,
{
    fn rtype(&self) -> Rtype {
        match self {
            Self::This(data) => data.rtype(),
            Self::Next(data) => data.rtype(),
        }
    }
}

impl<T, U> ComposeRecordData for RecordDataChain<T, U>
where
    T: ComposeRecordData,
    U: ComposeRecordData,
{
    fn rdlen(&self, compress: bool) -> Option<u16> {
        match self {
            Self::This(data) => data.rdlen(compress),
            Self::Next(data) => data.rdlen(compress),
        }
    }

    fn compose_rdata<Target: Composer + ?Sized>(
        &self,
        target: &mut Target,
    ) -> Result<(), Target::AppendError> {
        match self {
            Self::This(data) => data.compose_rdata(target),
            Self::Next(data) => data.compose_rdata(target),
        }
    }

    fn compose_canonical_rdata<Target: Composer + ?Sized>(
        &self,
        target: &mut Target,
    ) -> Result<(), Target::AppendError> {
        match self {
            Self::This(data) => data.compose_canonical_rdata(target),
            Self::Next(data) => data.compose_canonical_rdata(target),
        }
    }
}

/// A growable octet buffer that the `domain` crate's octet traits can target
/// directly, backed by a `Vec<u8>` instead of the fixed `&mut [u8]` slice (or
/// fixed-capacity `heapless::Vec`) a `no_std` build would use.
#[derive(Debug, Default, Clone)]
pub struct Buf(pub Vec<u8>);

impl Buf {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }
}

impl FreezeBuilder for Buf {
    type Octets = Self;

    fn freeze(self) -> Self {
        self
    }
}

impl Octets for Buf {
    type Range<'r> = &'r [u8];

    fn range(&self, range: impl RangeBounds<usize>) -> Self::Range<'_> {
        self.0.range(range)
    }
}

impl FromBuilder for Buf {
    type Builder = Buf;

    fn from_builder(builder: Self::Builder) -> Self {
        builder
    }
}

impl Composer for Buf {}

impl OctetsBuilder for Buf {
    type AppendError = core::convert::Infallible;

    fn append_slice(&mut self, slice: &[u8]) -> Result<(), Self::AppendError> {
        self.0.extend_from_slice(slice);
        Ok(())
    }
}

impl Truncate for Buf {
    fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }
}

impl AsMut<[u8]> for Buf {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl AsRef<[u8]> for Buf {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// The concrete answer record type produced by [`HostAnswers`] implementors:
/// either our own [`Txt`] record data, or anything `domain` already knows how
/// to encode.
pub type HostAnswer<'a> =
    Record<Labels<'a>, RecordDataChain<Txt<'a>, AllRecordData<&'a [u8], Labels<'a>>>>;

/// Visitor-pattern trait for entities that can produce mDNS / DNS-SD answer
/// records (hosts, services) without allocating a `Vec` of them up front.
///
/// The callback is invoked once per answer record; names are constructed
/// on-the-fly out of borrowed `&str` labels, so a whole answer set can be
/// produced without any heap allocation beyond what the caller's buffer
/// already owns.
pub trait HostAnswers {
    /// Visits every answer this entity has, regardless of which question (if
    /// any) is being answered — filtering by question is the caller's job.
    fn visit<F, E>(&self, f: F) -> Result<(), E>
    where
        F: FnMut(HostAnswer) -> Result<(), E>,
        E: From<WireError>;
}

impl<T> HostAnswers for &T
where
    T: HostAnswers,
{
    fn visit<F, E>(&self, f: F) -> Result<(), E>
    where
        F: FnMut(HostAnswer) -> Result<(), E>,
        E: From<WireError>,
    {
        (*self).visit(f)
    }
}

/// An entity with no answers of its own; useful as the tail of a chain.
pub struct NoHostAnswers;

impl NoHostAnswers {
    pub fn chain<T>(answers: T) -> ChainedHostAnswers<T, Self> {
        ChainedHostAnswers::new(answers, Self)
    }
}

impl HostAnswers for NoHostAnswers {
    fn visit<F, E>(&self, _f: F) -> Result<(), E>
    where
        F: FnMut(HostAnswer) -> Result<(), E>,
    {
        Ok(())
    }
}

/// A composite [`HostAnswers`] that visits two entities' answers in sequence.
pub struct ChainedHostAnswers<T, U> {
    first: T,
    second: U,
}

impl<T, U> ChainedHostAnswers<T, U> {
    pub const fn new(first: T, second: U) -> Self {
        Self { first, second }
    }

    pub fn chain<V>(self, answers: V) -> ChainedHostAnswers<V, Self> {
        ChainedHostAnswers::new(answers, self)
    }
}

impl<T, U> HostAnswers for ChainedHostAnswers<T, U>
where
    T: HostAnswers,
    U: HostAnswers,
{
    fn visit<F, E>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(HostAnswer) -> Result<(), E>,
        E: From<WireError>,
    {
        self.first.visit(&mut f)?;
        self.second.visit(f)
    }
}

/// Stamps the `id`/opcode/flags a reply or query message is expected to
/// carry, mirroring the minimal header shape every mDNS message on the wire
/// needs (authoritative query response, no recursion).
pub fn set_header<T: Composer>(answer: &mut MessageBuilder<T>, id: u16, response: bool) {
    let header = answer.header_mut();
    header.set_id(id);
    header.set_opcode(Opcode::QUERY);
    header.set_rcode(Rcode::NOERROR);

    let mut flags = Flags::new();
    flags.qr = response;
    flags.aa = response;
    header.set_flags(flags);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_iter_appends_root() {
        let name = Labels::new(&["foo", "local"]);
        let labels: Vec<_> = name.iter_labels().map(|l| l.to_string()).collect();

        assert_eq!(labels, vec!["foo", "local", ""]);
    }

    #[test]
    fn txt_empty_encodes_single_zero_byte() {
        let txt = Txt::new(&[]);
        let mut buf = Buf::new();

        txt.compose_rdata(&mut buf).unwrap();

        assert_eq!(buf.0, vec![0]);
    }

    #[test]
    fn txt_kv_encodes_length_prefixed_pair() {
        let txt = Txt::new(&[("rv", "1")]);
        let mut buf = Buf::new();

        txt.compose_rdata(&mut buf).unwrap();

        assert_eq!(buf.0, vec![4, b'r', b'v', b'=', b'1']);
    }

    #[test]
    fn buf_grows_past_any_fixed_capacity() {
        let mut buf = Buf::new();

        for _ in 0..4096 {
            buf.append_slice(&[0u8]).unwrap();
        }

        assert_eq!(buf.0.len(), 4096);
    }
}
