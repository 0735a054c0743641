/// A page fetch handed out by [`PaginationCursor::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
    epoch: u64,
}

/// Offset/has-more bookkeeping for loading older entities.
///
/// The offset counts entities delivered by the server through snapshots and pages; live
/// prepends never move it. At most one request is outstanding, and a snapshot or reset
/// invalidates whatever is in flight.
#[derive(Debug)]
pub struct PaginationCursor {
    page_size: usize,
    offset: usize,
    has_more: bool,
    in_flight: bool,
    epoch: u64,
}

impl PaginationCursor {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            offset: 0,
            has_more: true,
            in_flight: false,
            epoch: 0,
        }
    }

    /// Claims the next page, or `None` when exhausted or a request is already running.
    pub fn begin(&mut self) -> Option<PageRequest> {
        if !self.has_more || self.in_flight {
            return None;
        }
        self.in_flight = true;
        Some(PageRequest {
            offset: self.offset,
            limit: self.page_size,
            epoch: self.epoch,
        })
    }

    /// Records a finished page. A short page ends pagination regardless of the server hint.
    /// Returns false when the request was superseded and its result must be dropped.
    pub fn complete(&mut self, request: PageRequest, received: usize, hint: Option<bool>) -> bool {
        if request.epoch != self.epoch {
            return false;
        }
        self.in_flight = false;
        self.offset = request.offset + received;
        self.has_more = self.more_after(received, hint);
        true
    }

    /// Releases a failed request so the same page can be retried.
    pub fn abort(&mut self, request: PageRequest) {
        if request.epoch == self.epoch {
            self.in_flight = false;
        }
    }

    /// Re-anchors after an authoritative snapshot of `received` entities. Same rule as a
    /// page: only a full window can have more behind it.
    pub fn reset_window(&mut self, received: usize, hint: Option<bool>) {
        self.epoch += 1;
        self.in_flight = false;
        self.offset = received;
        self.has_more = self.more_after(received, hint);
    }

    fn more_after(&self, received: usize, hint: Option<bool>) -> bool {
        received >= self.page_size && hint != Some(false)
    }

    pub fn reset(&mut self) {
        self.epoch += 1;
        self.in_flight = false;
        self.offset = 0;
        self.has_more = true;
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_page_exhausts_cursor() {
        let mut cursor = PaginationCursor::new(30);
        cursor.reset_window(30, None);
        assert!(cursor.has_more());

        let request = cursor.begin().expect("page");
        assert_eq!((request.offset, request.limit), (30, 30));
        assert!(cursor.complete(request, 12, Some(true)));
        assert!(!cursor.has_more());
        assert_eq!(cursor.offset(), 42);
        assert!(cursor.begin().is_none());
    }

    #[test]
    fn one_request_at_a_time() {
        let mut cursor = PaginationCursor::new(10);
        let first = cursor.begin().expect("first");
        assert!(cursor.begin().is_none());
        cursor.abort(first);
        let retry = cursor.begin().expect("retry");
        assert_eq!(retry.offset, first.offset);
    }

    #[test]
    fn snapshot_supersedes_in_flight_page() {
        let mut cursor = PaginationCursor::new(10);
        let stale = cursor.begin().expect("page");
        cursor.reset_window(10, Some(true));
        assert!(!cursor.complete(stale, 10, None));
        assert_eq!(cursor.offset(), 10);
        assert!(cursor.begin().is_some());
    }

    #[test]
    fn short_snapshot_ends_window_despite_hint() {
        let mut cursor = PaginationCursor::new(10);
        cursor.reset_window(3, Some(true));
        assert!(!cursor.has_more());
        assert!(cursor.begin().is_none());
        cursor.reset_window(10, Some(false));
        assert!(!cursor.has_more());
        cursor.reset_window(10, None);
        assert!(cursor.has_more());
        cursor.reset_window(4, None);
        assert!(!cursor.has_more());
    }
}
