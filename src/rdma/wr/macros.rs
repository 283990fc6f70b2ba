macro_rules! impl_wr_id_accessors {
    ($wr:ty) => {
        impl $wr {
            /// Set the work request ID.
            #[inline]
            pub fn set_id(&mut self, wr_id: $crate::rdma::type_alias::WrId) -> &mut Self {
                self.wr_id = wr_id;
                self
            }

            /// Get the work request ID.
            #[inline]
            pub fn id(&self) -> $crate::rdma::type_alias::WrId {
                self.wr_id
            }
        }
    };
}
