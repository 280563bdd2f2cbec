//! Purpose: Describe paged retrieval and walk a paged listing one page at a time.
//! Exports: `Page`, `Pages`.
//! Role: Shared by every listing that accepts `pageLength`/`pageNumber`.
//! Invariants: Page numbers are zero-based; a page length of zero is rejected.
//! Invariants: `Pages` stops after a short page, an empty page, or the first error.
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Page {
    pub length: usize,
    pub number: usize,
}

impl Page {
    pub fn new(length: usize, number: usize) -> Result<Self, Error> {
        if length == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("page length must be greater than zero")
                .with_hint("Omit the page to fetch everything, or use a positive length."));
        }
        Ok(Self { length, number })
    }

    pub fn first(length: usize) -> Result<Self, Error> {
        Self::new(length, 0)
    }

    pub fn next(self) -> Self {
        Self {
            length: self.length,
            number: self.number + 1,
        }
    }

    /// Query parameters understood by the server, in request order.
    pub fn query_pairs(&self) -> [(&'static str, String); 2] {
        [
            ("pageLength", self.length.to_string()),
            ("pageNumber", self.number.to_string()),
        ]
    }
}

/// Iterator over successive pages produced by `fetch`.
pub struct Pages<T, F>
where
    F: FnMut(Page) -> Result<Vec<T>, Error>,
{
    fetch: F,
    next: Option<Page>,
}

impl<T, F> Pages<T, F>
where
    F: FnMut(Page) -> Result<Vec<T>, Error>,
{
    pub fn new(start: Page, fetch: F) -> Self {
        Self {
            fetch,
            next: Some(start),
        }
    }

    /// Drains the remaining pages into a single list.
    pub fn collect_all(self) -> Result<Vec<T>, Error> {
        let mut out = Vec::new();
        for page in self {
            out.extend(page?);
        }
        Ok(out)
    }
}

impl<T, F> Iterator for Pages<T, F>
where
    F: FnMut(Page) -> Result<Vec<T>, Error>,
{
    type Item = Result<Vec<T>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let page = self.next.take()?;
        match (self.fetch)(page) {
            Ok(items) if items.is_empty() => None,
            Ok(items) => {
                if items.len() >= page.length {
                    self.next = Some(page.next());
                }
                Some(Ok(items))
            }
            Err(err) => Some(Err(err)),
        }
    }
}
