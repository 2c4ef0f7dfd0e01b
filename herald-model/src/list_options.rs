/// Pagination query for listing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ListOptions {
    pub limit: i64,
    pub offset: i64,
    pub page: i64,
}

impl ListOptions {
    pub const DEFAULT_LIMIT: i64 = 20;
    pub const DEFAULT_OFFSET: i64 = 0;
    pub const DEFAULT_PAGE: i64 = 1;

    pub fn new(limit: i64, offset: i64, page: i64) -> Self {
        Self {
            limit,
            offset,
            page,
        }
    }

    /// Fills non-positive fields with defaults. A page past the first wins
    /// over any supplied offset.
    pub fn normalized(self) -> Self {
        let mut opts = self;
        if opts.limit <= 0 {
            opts.limit = Self::DEFAULT_LIMIT;
        }
        if opts.offset <= 0 {
            opts.offset = Self::DEFAULT_OFFSET;
        }
        if opts.page <= 0 {
            opts.page = Self::DEFAULT_PAGE;
        }
        if opts.page > 1 {
            opts.offset = (opts.page - 1).saturating_mul(opts.limit);
        }
        opts
    }
}
