pub mod cart_item;
pub mod checkout_intent;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod plant;

pub use cart_item::Entity as CartItem;
pub use checkout_intent::Entity as CheckoutIntent;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use payment::Entity as Payment;
pub use plant::Entity as Plant;

pub type CartItemModel = cart_item::Model;
pub type CheckoutIntentModel = checkout_intent::Model;
pub type OrderModel = order::Model;
pub type OrderItemModel = order_item::Model;
pub type PaymentModel = payment::Model;
pub type PlantModel = plant::Model;
