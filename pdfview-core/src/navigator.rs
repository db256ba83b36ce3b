// Page numbers are 1-based everywhere except `observe`.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialPage {
    #[default]
    Unset,
    /// Configured but no document has been shown yet (0-based).
    Pending(usize),
    /// Consumed. Never applied again for the lifetime of the session.
    Applied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageChange {
    pub page: usize,
    pub page_count: usize,
}

#[derive(Debug, Default)]
pub struct PageNavigator {
    page_count: Option<usize>,
    current: usize,
    pending: Option<usize>,
    initial: InitialPage,
}

impl PageNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial(&self) -> InitialPage {
        self.initial
    }

    pub fn pending(&self) -> Option<usize> {
        self.pending.map(|index| index + 1)
    }

    /// Ignored once an initial page has been applied.
    pub fn set_initial_page(&mut self, page: i64) {
        if self.initial == InitialPage::Applied {
            return;
        }
        self.initial = InitialPage::Pending(to_index(page.max(1)));
    }

    /// Pages below 1 are ignored. Without a document the request is remembered (the latest
    /// one wins) and applied by [`attach`](Self::attach).
    pub fn go_to(&mut self, page: i64) -> Option<PageChange> {
        if page < 1 {
            return None;
        }
        let index = to_index(page);
        if self.page_count.is_none() {
            self.pending = Some(index);
            return None;
        }
        self.move_to(index)
    }

    pub fn next(&mut self) -> Option<PageChange> {
        self.page_count?;
        self.move_to(self.current.saturating_add(1))
    }

    pub fn prev(&mut self) -> Option<PageChange> {
        self.page_count?;
        if self.current == 0 {
            return None;
        }
        self.move_to(self.current - 1)
    }

    pub fn observe(&mut self, index: usize) -> Option<PageChange> {
        self.page_count?;
        self.move_to(index)
    }

    /// Binds a freshly opened document and applies the pending request, or else the initial
    /// page if it has not been used yet. A pending request consumes the initial page.
    pub fn attach(&mut self, page_count: usize) -> PageChange {
        self.page_count = Some(page_count);
        self.current = 0;

        let target = match (self.pending.take(), self.initial) {
            (Some(index), initial) => {
                if matches!(initial, InitialPage::Pending(_)) {
                    self.initial = InitialPage::Applied;
                }
                Some(index)
            }
            (None, InitialPage::Pending(index)) => {
                self.initial = InitialPage::Applied;
                Some(index)
            }
            (None, _) => None,
        };
        if let Some(index) = target {
            self.current = index.min(page_count.saturating_sub(1));
        }
        self.change()
    }

    pub fn detach(&mut self) {
        self.page_count = None;
        self.current = 0;
    }

    /// 1-based; 1 when nothing is loaded.
    pub fn page(&self) -> usize {
        self.current + 1
    }

    pub fn page_count(&self) -> usize {
        self.page_count.unwrap_or(0)
    }

    fn move_to(&mut self, index: usize) -> Option<PageChange> {
        let count = self.page_count?;
        if count == 0 {
            return None;
        }
        let index = index.min(count - 1);
        if index == self.current {
            return None;
        }
        self.current = index;
        Some(self.change())
    }

    fn change(&self) -> PageChange {
        PageChange {
            page: self.current + 1,
            page_count: self.page_count(),
        }
    }
}

fn to_index(page: i64) -> usize {
    usize::try_from(page.saturating_sub(1)).unwrap_or(usize::MAX)
}
