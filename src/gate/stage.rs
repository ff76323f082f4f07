// self
use crate::_prelude::*;

/// Position of a request in the gate pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GateStage {
	/// Request arrived; nothing checked yet.
	Received,
	/// Bearer token verified and not revoked.
	TokenVerified,
	/// Quota granted.
	QuotaChecked,
	/// Exclusive lock acquired.
	LockHeld,
	/// Downstream handler running.
	Executing,
	/// Handler finished (or timed out) and any lock was released.
	Released,
	/// Rejected before the handler ran.
	Denied,
}
impl GateStage {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Received => "received",
			Self::TokenVerified => "token_verified",
			Self::QuotaChecked => "quota_checked",
			Self::LockHeld => "lock_held",
			Self::Executing => "executing",
			Self::Released => "released",
			Self::Denied => "denied",
		}
	}

	/// Returns `true` once no further transition is possible.
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Released | Self::Denied)
	}

	/// Returns `true` if `next` directly follows `self`.
	pub const fn can_advance(self, next: Self) -> bool {
		matches!(
			(self, next),
			(Self::Received, Self::TokenVerified)
				| (Self::TokenVerified, Self::QuotaChecked)
				| (Self::QuotaChecked, Self::LockHeld)
				| (Self::QuotaChecked, Self::Executing)
				| (Self::LockHeld, Self::Executing)
				| (Self::Executing, Self::Released)
				| (Self::Received | Self::TokenVerified | Self::QuotaChecked | Self::LockHeld, Self::Denied)
		)
	}

	/// Moves to `next`, rejecting transitions the pipeline does not allow.
	pub fn advance(self, next: Self) -> Result<Self, StageTransitionError> {
		if self.can_advance(next) {
			Ok(next)
		} else {
			Err(StageTransitionError { from: self, to: next })
		}
	}
}
impl Display for GateStage {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Illegal pipeline transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ThisError)]
#[error("Gate cannot move from `{from}` to `{to}`.")]
pub struct StageTransitionError {
	/// Stage the request was in.
	pub from: GateStage,
	/// Requested stage.
	pub to: GateStage,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn happy_paths_advance_in_order() {
		let exclusive = [
			GateStage::TokenVerified,
			GateStage::QuotaChecked,
			GateStage::LockHeld,
			GateStage::Executing,
			GateStage::Released,
		];
		let end = exclusive
			.into_iter()
			.try_fold(GateStage::Received, GateStage::advance)
			.expect("Exclusive path should be legal.");

		assert_eq!(end, GateStage::Released);
		assert!(GateStage::QuotaChecked.can_advance(GateStage::Executing), "Lock stage is optional.");
	}

	#[test]
	fn stages_cannot_be_skipped_or_reopened() {
		assert_eq!(
			GateStage::Received.advance(GateStage::Executing),
			Err(StageTransitionError { from: GateStage::Received, to: GateStage::Executing })
		);
		assert!(GateStage::Executing.advance(GateStage::Denied).is_err());
		assert!(GateStage::Denied.advance(GateStage::TokenVerified).is_err());
		assert!(GateStage::Released.is_terminal());
	}
}
