//! Client interface, protocol-layer seam and the bare IPbus layer.
//!
//! The client assembles logical packets into a send buffer, one IPbus
//! transaction per packet, with a pending-transaction record queued for each.
//! `dispatch` finalises the buffer, pushes it through the transport and
//! validates the reply in lock-step, which fills the deferred handles.
//! A batch succeeds or fails atomically: any dispatch error invalidates
//! every handle of the batch.

use std::{cell::RefCell, collections::VecDeque, io::Cursor, rc::Rc};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::{debug, error, trace};

use regbus_core::{
    config::ClientConfig,
    constants::{DEFAULT_BUFFER_WINDOW, MAX_TRANSACTION_WORDS, NOMASK},
    error::{ErrorKind, Result},
    transport::Transport,
};
use regbus_protocol::header::{TransactionHeader, TransactionType};

use crate::{
    node::BlockMode,
    val::{ValHeader, ValState, ValStatus, ValVector, ValWord},
};

/// One pending transaction awaiting its reply.
#[derive(Debug)]
pub struct TransactionRecord {
    /// Transaction id allocated at assembly time.
    pub transaction_id: u16,
    /// Transaction type on the wire.
    pub transaction_type: TransactionType,
    /// Word count carried in the request header.
    pub word_count: u8,
    /// Payload words the reply must deliver.
    pub expected_reply_words: u8,
    /// Shared storage the reply words land in.
    pub(crate) target: Rc<RefCell<ValState>>,
    /// First index within the target the reply words land at; block
    /// transfers split over several transactions share one target.
    pub target_offset: usize,
}

/// One layer of the protocol stack.
///
/// Layers compose by owned value: the ControlHub layer holds the bare IPbus
/// layer and chains these hooks in order. The client invokes `preamble`
/// before the words of each new logical packet, `predispatch` once before
/// the batch leaves, and `validate` on the reply.
pub trait ProtocolLayer {
    /// Appends this layer's per-packet framing to the send buffer.
    fn preamble(&mut self, buffer: &mut Vec<u8>);

    /// Bytes `preamble` contributes to each logical packet.
    fn preamble_size(&self) -> usize;

    /// Finalises the send buffer once all packets are assembled.
    fn predispatch(&mut self, buffer: &mut [u8]);

    /// Checks the reply against the request and fills the deferred targets
    /// of the records it consumes from `pending`.
    fn validate(
        &mut self,
        sent: &[u8],
        reply: &[u8],
        pending: &mut VecDeque<TransactionRecord>,
    ) -> Result<()>;

    /// Logical packets assembled before the client flushes implicitly.
    fn max_buffers(&self) -> usize;

    /// Allocates the next transaction id. Wraps modulo 2^16.
    fn next_transaction_id(&mut self) -> u16;

    /// Discards any per-batch state after a dispatch completes or fails.
    fn clear(&mut self);
}

/// The bare IPbus protocol layer: no framing, transactions back to back.
#[derive(Debug, Default)]
pub struct IpbusLayer {
    transaction_counter: u16,
}

impl IpbusLayer {
    /// Creates a layer with the transaction counter at zero.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Request words following the header, by transaction type.
fn request_word_count(header: &TransactionHeader) -> usize {
    match header.transaction_type {
        TransactionType::Read | TransactionType::NonIncrementalRead => 1,
        TransactionType::Write | TransactionType::NonIncrementalWrite => {
            1 + header.word_count as usize
        }
        TransactionType::RmwBits => 3,
        TransactionType::RmwSum => 2,
        TransactionType::Status => 0,
    }
}

/// Reply words following the header, by transaction type.
fn reply_word_count(header: &TransactionHeader) -> usize {
    match header.transaction_type {
        TransactionType::Read | TransactionType::NonIncrementalRead => header.word_count as usize,
        TransactionType::RmwBits | TransactionType::RmwSum => 1,
        TransactionType::Write | TransactionType::NonIncrementalWrite | TransactionType::Status => 0,
    }
}

fn truncated(which: &str) -> ErrorKind {
    ErrorKind::IpbusValidationFailed(format!("{} truncated", which))
}

impl ProtocolLayer for IpbusLayer {
    fn preamble(&mut self, _buffer: &mut Vec<u8>) {}

    fn preamble_size(&self) -> usize {
        0
    }

    fn predispatch(&mut self, _buffer: &mut [u8]) {}

    fn validate(
        &mut self,
        sent: &[u8],
        reply: &[u8],
        pending: &mut VecDeque<TransactionRecord>,
    ) -> Result<()> {
        let mut request = Cursor::new(sent);
        let mut response = Cursor::new(reply);

        while (request.position() as usize) < sent.len() {
            let request_header = TransactionHeader::parse(
                request.read_u32::<BigEndian>().map_err(|_| truncated("request stream"))?,
            )?;
            let skip = request.position() + 4 * request_word_count(&request_header) as u64;
            if skip > sent.len() as u64 {
                return Err(truncated("request stream"));
            }
            request.set_position(skip);

            let record = pending.pop_front().ok_or_else(|| {
                ErrorKind::IpbusValidationFailed(
                    "request stream holds more transactions than were recorded".to_string(),
                )
            })?;

            let reply_header = TransactionHeader::parse(
                response.read_u32::<BigEndian>().map_err(|_| truncated("reply stream"))?,
            )?;
            if reply_header.version != request_header.version {
                return Err(ErrorKind::IpbusValidationFailed(format!(
                    "transaction {}: protocol version mismatch, request {} reply {}",
                    record.transaction_id, request_header.version, reply_header.version
                )));
            }
            if reply_header.transaction_id != request_header.transaction_id {
                return Err(ErrorKind::IpbusValidationFailed(format!(
                    "transaction id mismatch, request {} reply {}",
                    request_header.transaction_id, reply_header.transaction_id
                )));
            }
            if reply_header.transaction_type != request_header.transaction_type {
                return Err(ErrorKind::IpbusValidationFailed(format!(
                    "transaction {}: type mismatch, request {:?} reply {:?}",
                    record.transaction_id,
                    request_header.transaction_type,
                    reply_header.transaction_type
                )));
            }
            if !reply_header.is_success() {
                return Err(ErrorKind::IpbusValidationFailed(format!(
                    "transaction {}: endpoint reported info code {:#03x}",
                    record.transaction_id, reply_header.info_code
                )));
            }
            if reply_header.word_count != request_header.word_count {
                return Err(ErrorKind::IpbusValidationFailed(format!(
                    "transaction {}: word count mismatch, request {} reply {}",
                    record.transaction_id, request_header.word_count, reply_header.word_count
                )));
            }

            let payload_words = reply_word_count(&request_header);
            let mut state = record.target.borrow_mut();
            for i in 0..payload_words {
                let word =
                    response.read_u32::<BigEndian>().map_err(|_| truncated("reply stream"))?;
                state.words[record.target_offset + i] = word;
            }
            state.status = ValStatus::Valid;
        }

        if (response.position() as usize) != reply.len() {
            return Err(ErrorKind::IpbusValidationFailed(
                "reply stream holds trailing bytes".to_string(),
            ));
        }
        Ok(())
    }

    fn max_buffers(&self) -> usize {
        DEFAULT_BUFFER_WINDOW
    }

    fn next_transaction_id(&mut self) -> u16 {
        let id = self.transaction_counter;
        self.transaction_counter = self.transaction_counter.wrapping_add(1);
        id
    }

    fn clear(&mut self) {}
}

/// Stream framing for the bare IPbus stack over TCP.
///
/// A byte stream has no packet boundaries, so each logical packet carries
/// a leading 32-bit big-endian count of the bytes that follow it, in both
/// directions. The count is appended as a placeholder and patched during
/// predispatch once the packet's words are final.
#[derive(Debug, Default)]
pub struct StreamFramingLayer {
    inner: IpbusLayer,
    frame_offsets: VecDeque<usize>,
}

impl StreamFramingLayer {
    /// Creates the layer around a fresh bare IPbus layer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProtocolLayer for StreamFramingLayer {
    fn preamble(&mut self, buffer: &mut Vec<u8>) {
        self.inner.preamble(buffer);
        self.frame_offsets.push_back(buffer.len());
        buffer.extend_from_slice(&0u32.to_be_bytes()); // placeholder for byte count
    }

    fn preamble_size(&self) -> usize {
        4 + self.inner.preamble_size()
    }

    fn predispatch(&mut self, buffer: &mut [u8]) {
        self.inner.predispatch(buffer);
        let ends: Vec<usize> = self
            .frame_offsets
            .iter()
            .skip(1)
            .copied()
            .chain(std::iter::once(buffer.len()))
            .collect();
        for (&offset, end) in self.frame_offsets.iter().zip(ends) {
            // The count excludes its own field.
            let byte_count = (end - offset - 4) as u32;
            buffer[offset..offset + 4].copy_from_slice(&byte_count.to_be_bytes());
        }
    }

    fn validate(
        &mut self,
        sent: &[u8],
        reply: &[u8],
        pending: &mut VecDeque<TransactionRecord>,
    ) -> Result<()> {
        let boundaries: Vec<usize> = self.frame_offsets.iter().copied().collect();
        let mut cursor = Cursor::new(reply);
        for (i, offset) in boundaries.iter().enumerate() {
            let send_start = offset + 4;
            let send_end = boundaries.get(i + 1).copied().unwrap_or(sent.len());

            let byte_count = cursor
                .read_u32::<BigEndian>()
                .map_err(|_| truncated("reply framing"))? as usize;
            let position = cursor.position() as usize;
            let reply_region = reply.get(position..position + byte_count).ok_or_else(|| {
                ErrorKind::IpbusValidationFailed(
                    "reply shorter than its framing byte count".to_string(),
                )
            })?;

            self.inner.validate(&sent[send_start..send_end], reply_region, pending)?;
            cursor.set_position((position + byte_count) as u64);
            self.frame_offsets.pop_front();
        }

        if (cursor.position() as usize) != reply.len() {
            return Err(ErrorKind::IpbusValidationFailed(
                "reply stream holds trailing bytes".to_string(),
            ));
        }
        Ok(())
    }

    fn max_buffers(&self) -> usize {
        self.inner.max_buffers()
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.inner.next_transaction_id()
    }

    fn clear(&mut self) {
        self.inner.clear();
        self.frame_offsets.clear();
    }
}

/// A client bound to one endpoint through a protocol stack and a transport.
///
/// Not safe for simultaneous access from multiple threads; callers
/// serialise access per client. Many deferred operations can be batched
/// before `dispatch` is invoked; only `dispatch` (and deferred access after
/// it) touches I/O.
pub struct ClientInterface {
    id: String,
    uri: String,
    config: ClientConfig,
    layer: Box<dyn ProtocolLayer>,
    transport: Box<dyn Transport>,
    send_buffer: Vec<u8>,
    pending: VecDeque<TransactionRecord>,
}

impl ClientInterface {
    /// Creates a client over the given protocol stack and transport.
    pub fn new(
        id: impl Into<String>,
        uri: impl Into<String>,
        layer: Box<dyn ProtocolLayer>,
        transport: Box<dyn Transport>,
        config: ClientConfig,
    ) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            config,
            layer,
            transport,
            send_buffer: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// The unique identifier this client was given.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The URI of the target.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The reply timeout period.
    pub fn timeout(&self) -> std::time::Duration {
        self.config.timeout
    }

    /// Updates the reply timeout period on the client and its transport.
    pub fn set_timeout(&mut self, timeout: std::time::Duration) -> Result<()> {
        self.config.timeout = timeout;
        self.transport.set_timeout(timeout)
    }

    /// Transactions assembled and not yet dispatched.
    pub fn queued_transactions(&self) -> usize {
        self.pending.len()
    }

    /// Reads one word.
    pub fn read(&mut self, addr: u32) -> Result<ValWord> {
        self.read_masked(addr, NOMASK)
    }

    /// Reads one word; the deferred value resolves to the masked field
    /// shifted down to bit 0.
    pub fn read_masked(&mut self, addr: u32, mask: u32) -> Result<ValWord> {
        let target = ValState::pending(1, mask);
        self.append_transaction(TransactionType::Read, 1, &[addr], 1, target.clone(), 0)?;
        Ok(ValWord::from_state(target))
    }

    /// Writes one word.
    pub fn write(&mut self, addr: u32, value: u32) -> Result<ValHeader> {
        let target = ValState::pending(0, NOMASK);
        self.append_transaction(TransactionType::Write, 1, &[addr, value], 0, target.clone(), 0)?;
        Ok(ValHeader::from_state(target))
    }

    /// Writes a masked field: reads the current word, flushes, folds the
    /// field in and queues the write-back. The intermediate flush makes the
    /// current value available for the fold.
    pub fn write_masked(&mut self, addr: u32, value: u32, mask: u32) -> Result<ValHeader> {
        let current = self.read(addr)?;
        self.dispatch()?;
        let old = current.value()?;
        let shift = if mask == 0 { 0 } else { mask.trailing_zeros() };
        let folded = (old & !mask) | ((value << shift) & mask);
        self.write(addr, folded)
    }

    /// Reads a block of `words` words starting at `addr`. Blocks larger
    /// than one transaction can carry are split into chunks that share one
    /// deferred vector.
    pub fn read_block(&mut self, addr: u32, words: u32, mode: BlockMode) -> Result<ValVector> {
        let target = ValState::pending(words as usize, NOMASK);
        if words == 0 {
            target.borrow_mut().status = ValStatus::Valid;
            return Ok(ValVector::from_state(target));
        }
        let transaction_type = match mode {
            BlockMode::NonIncremental => TransactionType::NonIncrementalRead,
            _ => TransactionType::Read,
        };
        let mut chunk_addr = addr;
        let mut offset = 0usize;
        let mut remaining = words as usize;
        while remaining > 0 {
            let chunk = remaining.min(MAX_TRANSACTION_WORDS);
            self.append_transaction(
                transaction_type,
                chunk as u8,
                &[chunk_addr],
                chunk as u8,
                target.clone(),
                offset,
            )?;
            if transaction_type == TransactionType::Read {
                chunk_addr = chunk_addr.wrapping_add(chunk as u32);
            }
            offset += chunk;
            remaining -= chunk;
        }
        Ok(ValVector::from_state(target))
    }

    /// Writes a block of values starting at `addr`, chunked like
    /// `read_block`.
    pub fn write_block(&mut self, addr: u32, values: &[u32], mode: BlockMode) -> Result<ValHeader> {
        let target = ValState::pending(0, NOMASK);
        if values.is_empty() {
            target.borrow_mut().status = ValStatus::Valid;
            return Ok(ValHeader::from_state(target));
        }
        let transaction_type = match mode {
            BlockMode::NonIncremental => TransactionType::NonIncrementalWrite,
            _ => TransactionType::Write,
        };
        let mut chunk_addr = addr;
        let mut offset = 0usize;
        while offset < values.len() {
            let chunk = (values.len() - offset).min(MAX_TRANSACTION_WORDS);
            let mut request_words = Vec::with_capacity(1 + chunk);
            request_words.push(chunk_addr);
            request_words.extend_from_slice(&values[offset..offset + chunk]);
            self.append_transaction(
                transaction_type,
                chunk as u8,
                &request_words,
                0,
                target.clone(),
                0,
            )?;
            if transaction_type == TransactionType::Write {
                chunk_addr = chunk_addr.wrapping_add(chunk as u32);
            }
            offset += chunk;
        }
        Ok(ValHeader::from_state(target))
    }

    /// Read-modify-write: the endpoint computes `new = (old & and_term) | or_term`
    /// and returns the pre-modification word.
    pub fn rmw_bits(&mut self, addr: u32, and_term: u32, or_term: u32) -> Result<ValWord> {
        let target = ValState::pending(1, NOMASK);
        self.append_transaction(
            TransactionType::RmwBits,
            1,
            &[addr, and_term, or_term],
            1,
            target.clone(),
            0,
        )?;
        Ok(ValWord::from_state(target))
    }

    /// Read-modify-write: the endpoint computes `new = old + addend` and
    /// returns the pre-modification word.
    pub fn rmw_sum(&mut self, addr: u32, addend: u32) -> Result<ValWord> {
        let target = ValState::pending(1, NOMASK);
        self.append_transaction(TransactionType::RmwSum, 1, &[addr, addend], 1, target.clone(), 0)?;
        Ok(ValWord::from_state(target))
    }

    /// Queues a protocol-status transaction; the endpoint's answer confirms
    /// it is alive and speaks this protocol version.
    pub fn byte_order_transaction(&mut self) -> Result<ValHeader> {
        let target = ValState::pending(0, NOMASK);
        self.append_transaction(TransactionType::Status, 0, &[], 0, target.clone(), 0)?;
        Ok(ValHeader::from_state(target))
    }

    fn append_transaction(
        &mut self,
        transaction_type: TransactionType,
        word_count: u8,
        request_words: &[u32],
        expected_reply_words: u8,
        target: Rc<RefCell<ValState>>,
        target_offset: usize,
    ) -> Result<()> {
        if self.pending.len() >= self.layer.max_buffers() {
            debug!(
                "Buffer window of {} logical packets is full on '{}', dispatching implicitly",
                self.layer.max_buffers(),
                self.id
            );
            self.dispatch()?;
        }
        self.send_buffer.reserve(self.layer.preamble_size() + 4 * (1 + request_words.len()));
        self.layer.preamble(&mut self.send_buffer);
        let transaction_id = self.layer.next_transaction_id();
        let header = TransactionHeader::request(transaction_id, word_count, transaction_type);
        self.send_buffer.extend_from_slice(&header.pack().to_be_bytes());
        for word in request_words {
            self.send_buffer.extend_from_slice(&word.to_be_bytes());
        }
        self.pending.push_back(TransactionRecord {
            transaction_id,
            transaction_type,
            word_count,
            expected_reply_words,
            target,
            target_offset,
        });
        Ok(())
    }

    /// Flushes the batch: finalises the buffer, exchanges it with the
    /// endpoint and validates the reply. On any failure every deferred
    /// handle of the batch is invalidated and a single error is returned;
    /// partial success is never exposed.
    pub fn dispatch(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.layer.predispatch(&mut self.send_buffer);
        let batch: Vec<Rc<RefCell<ValState>>> =
            self.pending.iter().map(|record| record.target.clone()).collect();
        match self.exchange() {
            Ok(()) => {
                trace!("Dispatched {} transaction(s) on '{}'", batch.len(), self.id);
                self.reclaim();
                Ok(())
            }
            Err(err) => {
                let cause = err.to_string();
                error!("Dispatch failed on '{}': {}", self.id, cause);
                for target in &batch {
                    target.borrow_mut().status = ValStatus::Invalid(cause.clone());
                }
                self.reclaim();
                Err(err)
            }
        }
    }

    fn exchange(&mut self) -> Result<()> {
        self.transport.send_bytes(&self.send_buffer)?;
        self.transport.flush_and_wait()?;
        let reply = self.transport.receive_bytes(self.config.max_reply_size)?;
        self.layer.validate(&self.send_buffer, &reply, &mut self.pending)
    }

    fn reclaim(&mut self) {
        self.send_buffer.clear();
        self.pending.clear();
        self.layer.clear();
    }
}
