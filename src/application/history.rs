use crate::domain::account::AccountId;
use crate::domain::ports::LedgerStoreRef;
use crate::domain::posting::{Posting, SequenceRange};
use crate::error::Result;
use std::collections::VecDeque;

pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Lazy, forward-only walk over an account's postings in sequence order.
///
/// Postings are fetched a page at a time. The cursor can be restarted from
/// the beginning or resumed from any sequence number, and it ends once the
/// range is exhausted; postings appended later are picked up only if they
/// fall inside the range and the cursor has not yet ended.
pub struct PostingCursor {
    ledger: LedgerStoreRef,
    account: AccountId,
    range: SequenceRange,
    next_from: u64,
    page_size: usize,
    buffer: VecDeque<Posting>,
    exhausted: bool,
}

impl PostingCursor {
    pub fn new(ledger: LedgerStoreRef, account: AccountId, range: SequenceRange) -> Self {
        Self {
            ledger,
            account,
            range,
            next_from: range.from,
            page_size: DEFAULT_PAGE_SIZE,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn account(&self) -> AccountId {
        self.account
    }

    /// Sequence number the next fetched posting will be at or after.
    pub fn position(&self) -> u64 {
        self.buffer
            .front()
            .map(|p| p.sequence)
            .unwrap_or(self.next_from)
    }

    pub async fn next(&mut self) -> Result<Option<Posting>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        Ok(self.buffer.pop_front())
    }

    async fn fill(&mut self) -> Result<()> {
        let page = self
            .ledger
            .postings_page(self.account, self.range.resume_at(self.next_from), self.page_size)
            .await?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        match page.last() {
            Some(last) => match last.sequence.checked_add(1) {
                Some(next) => self.next_from = next,
                None => self.exhausted = true,
            },
            None => self.exhausted = true,
        }
        self.buffer.extend(page);
        Ok(())
    }

    /// Continues from `sequence` (inclusive), keeping the original upper bound.
    pub fn resume_from(&mut self, sequence: u64) {
        self.next_from = sequence.max(self.range.from);
        self.buffer.clear();
        self.exhausted = false;
    }

    pub fn restart(&mut self) {
        self.resume_from(self.range.from);
    }

    /// Drains the remaining postings.
    pub async fn collect_all(&mut self) -> Result<Vec<Posting>> {
        let mut postings = Vec::new();
        while let Some(posting) = self.next().await? {
            postings.push(posting);
        }
        Ok(postings)
    }
}
